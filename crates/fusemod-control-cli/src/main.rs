// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fusemod_proto::{CapabilityFlags, ClientError, ControlClient, Event, WriteNotification};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Send FuseMod control commands through the host's named pipes"
)]
struct Cli {
    /// The host's inbound pipe (commands are written here)
    #[arg(long, env = "FUSEMOD_PIPE_IN")]
    pipe_in: PathBuf,

    /// The host's outbound pipe (responses and write notifications)
    #[arg(long, env = "FUSEMOD_PIPE_OUT")]
    pipe_out: PathBuf,

    /// Keep the session open after the command and print write notifications
    #[arg(long, global = true)]
    watch: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a directory
    Mkdir { path: String },
    /// Create an empty file with the given capabilities
    Mkfile {
        path: String,
        /// Kernel readers may read the file
        #[arg(long)]
        read: bool,
        /// Kernel writers may write the file
        #[arg(long)]
        write: bool,
        /// Apply kernel writes to the in-memory content as well
        #[arg(long)]
        copy_on_write: bool,
    },
    /// Delete a directory and everything below it
    Rmdir { path: String },
    /// Delete a file
    Rm { path: String },
    /// Replace a file's content
    Set(ContentArgs),
    /// Append to a file's content
    Append(ContentArgs),
    /// Run one command per line from a script ('-' for stdin) in one session
    ///
    /// Lines use the subcommand syntax, e.g. `mkfile /a/b --read --write`.
    /// Blank lines and lines starting with '#' are skipped.
    Batch {
        #[arg(default_value = "-")]
        script: PathBuf,
    },
    /// Only print write notifications until the host goes away
    Watch {
        /// Print notification content as hex instead of text
        #[arg(long)]
        hex: bool,
    },
}

/// One line of a batch script
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct BatchLine {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ContentArgs {
    path: String,

    /// Read content from a file ('-' for stdin)
    #[arg(long, conflicts_with = "data")]
    file: Option<PathBuf>,

    /// Literal content
    #[arg(long)]
    data: Option<String>,
}

impl ContentArgs {
    fn content(&self) -> Result<Vec<u8>> {
        match (&self.file, &self.data) {
            (_, Some(data)) => Ok(data.clone().into_bytes()),
            (Some(path), None) => read_content(path),
            (None, None) => read_content(Path::new("-")),
        }
    }

    fn has_explicit_source(&self) -> bool {
        self.data.is_some() || self.file.as_deref().is_some_and(|p| p != Path::new("-"))
    }
}

fn read_content(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        fs::read(path).with_context(|| format!("failed to read content file {:?}", path))
    }
}

impl Command {
    fn flags(read: bool, write: bool, copy_on_write: bool) -> CapabilityFlags {
        let mut flags = CapabilityFlags::empty();
        flags.set(CapabilityFlags::READABLE, read);
        flags.set(CapabilityFlags::WRITABLE, write);
        flags.set(CapabilityFlags::COPY_ON_WRITE, copy_on_write);
        flags
    }
}

/// Open the host's pipes in the order the host opens them.
fn connect(pipe_in: &Path, pipe_out: &Path) -> Result<ControlClient<File, File>> {
    let writer = OpenOptions::new()
        .write(true)
        .open(pipe_in)
        .with_context(|| {
            format!("failed to open inbound pipe {:?} (is the host running?)", pipe_in)
        })?;
    let reader = File::open(pipe_out)
        .with_context(|| format!("failed to open outbound pipe {:?}", pipe_out))?;
    debug!(?pipe_in, ?pipe_out, "connected to host");
    Ok(ControlClient::new(writer, reader))
}

fn status_error(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::Status { raw, code } => {
            anyhow!("host rejected command: status {raw} ({code:?})")
        }
        other => anyhow!(other),
    }
}

fn run_command<W: Write, R: Read>(
    client: &mut ControlClient<W, R>,
    command: &Command,
) -> Result<()> {
    let result = match command {
        Command::Mkdir { path } => client.mkdir(path),
        Command::Mkfile {
            path,
            read,
            write,
            copy_on_write,
        } => client.mkfile(path, Command::flags(*read, *write, *copy_on_write)),
        Command::Rmdir { path } => client.rmdir(path),
        Command::Rm { path } => client.rmfile(path),
        Command::Set(args) => client.upload(&args.path, &args.content()?),
        Command::Append(args) => client.append_all(&args.path, &args.content()?),
        Command::Batch { script } => {
            let input: Box<dyn BufRead> = if script == Path::new("-") {
                Box::new(BufReader::new(io::stdin()))
            } else {
                let file = File::open(script)
                    .with_context(|| format!("failed to open batch script {:?}", script))?;
                Box::new(BufReader::new(file))
            };
            run_batch(client, input)?;
            return Ok(());
        }
        Command::Watch { .. } => return Ok(()),
    };
    result.map_err(status_error)
}

/// Run every command of a batch script through one client. Stops at the
/// first failing line; returns the number of commands sent.
fn run_batch<W: Write, R: Read>(
    client: &mut ControlClient<W, R>,
    input: impl BufRead,
) -> Result<usize> {
    let mut sent = 0;
    for (index, line) in input.lines().enumerate() {
        let lineno = index + 1;
        let line = line.with_context(|| format!("failed to read batch line {lineno}"))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed = BatchLine::try_parse_from(line.split_whitespace())
            .map_err(|err| anyhow!("line {lineno}: {}", err.render().to_string().trim()))?;
        match &parsed.command {
            Command::Batch { .. } | Command::Watch { .. } => {
                bail!("line {lineno}: `{line}` is not allowed in a batch script")
            }
            Command::Set(args) | Command::Append(args) if !args.has_explicit_source() => {
                bail!("line {lineno}: content needs --data or --file in a batch script")
            }
            _ => {}
        }

        run_command(client, &parsed.command).with_context(|| format!("line {lineno}: `{line}`"))?;
        sent += 1;
    }
    debug!(commands = sent, "batch finished");
    Ok(sent)
}

fn format_notification(notification: &WriteNotification, as_hex: bool) -> String {
    let content = if as_hex {
        hex::encode(&notification.content)
    } else {
        String::from_utf8_lossy(&notification.content).into_owned()
    };
    format!(
        "WRITE\t{}\t{}\t{}\t{}",
        String::from_utf8_lossy(&notification.path),
        notification.offset,
        notification.content.len(),
        content
    )
}

fn watch<W: Write, R: Read>(client: &mut ControlClient<W, R>, as_hex: bool) -> Result<()> {
    let stdout = io::stdout();
    loop {
        match client.next_event() {
            Ok(Event::Write(notification)) => {
                let mut out = stdout.lock();
                writeln!(out, "{}", format_notification(&notification, as_hex))?;
                out.flush()?;
            }
            Ok(Event::Response { msg_type, status }) => {
                debug!(msg_type, status, "unsolicited response");
            }
            Err(ClientError::Closed) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut client = connect(&cli.pipe_in, &cli.pipe_out)?;

    run_command(&mut client, &cli.command)?;

    let as_hex = matches!(cli.command, Command::Watch { hex: true });
    for notification in client.take_notifications() {
        println!("{}", format_notification(&notification, as_hex));
    }

    if cli.watch || matches!(cli.command, Command::Watch { .. }) {
        watch(&mut client, as_hex)?;
    }
    Ok(())
}
