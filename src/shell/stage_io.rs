//! Input and output endpoints assigned to one pipeline stage.
//!
//! Each endpoint is owned by exactly one stage. External stages hand theirs to
//! the child process as `Stdio`; built-in stages convert them to async
//! readers and writers. Either way the endpoint is dropped when the stage
//! returns, which closes the pipe end and lets the neighbouring stage see EOF
//! or a broken pipe.

use std::fs::File;
use std::io::{PipeReader, PipeWriter};
use std::os::fd::OwnedFd;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::unix::pipe;

pub type StageReader = Box<dyn AsyncRead + Send + Unpin>;
pub type StageWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where a stage reads from.
#[derive(Debug)]
pub enum StageInput {
    /// The shell's own standard input.
    Stdin,
    /// Immediate EOF.
    Empty,
    /// Read end of the pipe from the previous stage.
    Pipe(PipeReader),
}

/// Where a stage writes to.
#[derive(Debug)]
pub enum StageOutput {
    /// The shell's own standard output.
    Stdout,
    /// The pipeline's redirect target.
    File(File),
    /// Write end of the pipe to the next stage.
    Pipe(PipeWriter),
}

impl StageInput {
    pub fn into_stdio(self) -> Stdio {
        match self {
            StageInput::Stdin => Stdio::inherit(),
            StageInput::Empty => Stdio::null(),
            StageInput::Pipe(reader) => Stdio::from(reader),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn into_reader(self) -> std::io::Result<StageReader> {
        Ok(match self {
            StageInput::Stdin => Box::new(tokio::io::stdin()),
            StageInput::Empty => Box::new(tokio::io::empty()),
            StageInput::Pipe(reader) => {
                Box::new(pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?)
            }
        })
    }
}

impl StageOutput {
    pub fn into_stdio(self) -> Stdio {
        match self {
            StageOutput::Stdout => Stdio::inherit(),
            StageOutput::File(file) => Stdio::from(file),
            StageOutput::Pipe(writer) => Stdio::from(writer),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn into_writer(self) -> std::io::Result<StageWriter> {
        Ok(match self {
            StageOutput::Stdout => Box::new(tokio::io::stdout()),
            StageOutput::File(file) => Box::new(tokio::fs::File::from_std(file)),
            StageOutput::Pipe(writer) => {
                Box::new(pipe::Sender::from_owned_fd(OwnedFd::from(writer))?)
            }
        })
    }
}
