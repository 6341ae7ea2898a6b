//! Built-in command table and stage dispatch.
//!
//! A stage's first word is looked up in [`Builtin`]. Built-ins get async
//! readers and writers over the stage's endpoints; anything else is spawned as
//! an external process with the endpoints as its stdin and stdout.

mod agent;
mod session;
mod system;

use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::Shell;
use super::stage_io::{StageInput, StageOutput, StageReader, StageWriter};
use crate::error::ShellError;

/// Control signal returned by a successful stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

/// Everything a built-in handler gets to work with.
pub struct Invocation<'a> {
    pub shell: &'a Arc<Shell>,
    pub args: &'a [String],
    pub input: StageReader,
    pub output: StageWriter,
    pub cancel: &'a CancellationToken,
}

impl Invocation<'_> {
    /// Write `value` as one line of compact JSON.
    pub async fn write_json_line<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> Result<(), ShellError> {
        let mut line = serde_json::to_vec(value).map_err(std::io::Error::from)?;
        line.push(b'\n');
        self.output.write_all(&line).await?;
        Ok(())
    }

    pub async fn write_line(&mut self, text: &str) -> Result<(), ShellError> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        Ok(())
    }
}

/// Every built-in command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Msg,
    Ctx,
    Tool,
    Prompt,
    Resource,
    Tools,
    Prompts,
    Resources,
    Connect,
    Disconnect,
    Status,
    Help,
    Version,
    Exit,
    Cat,
    Cd,
    Clear,
    Env,
    Export,
    Ls,
    Pwd,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "m" | "msg" => Builtin::Msg,
            "ctx" => Builtin::Ctx,
            "t" | "tool" => Builtin::Tool,
            "p" | "prompt" => Builtin::Prompt,
            "r" | "resource" => Builtin::Resource,
            "T" | "tools" => Builtin::Tools,
            "P" | "prompts" => Builtin::Prompts,
            "R" | "resources" => Builtin::Resources,
            "c" | "connect" => Builtin::Connect,
            "disconnect" => Builtin::Disconnect,
            "s" | "status" => Builtin::Status,
            "h" | "help" => Builtin::Help,
            "v" | "version" => Builtin::Version,
            "q" | "exit" | "quit" => Builtin::Exit,
            "cat" => Builtin::Cat,
            "cd" => Builtin::Cd,
            "clear" | "cls" => Builtin::Clear,
            "env" => Builtin::Env,
            "export" => Builtin::Export,
            "ls" => Builtin::Ls,
            "pwd" => Builtin::Pwd,
            _ => return None,
        })
    }

    async fn run(self, inv: &mut Invocation<'_>) -> Result<Control, ShellError> {
        match self {
            Builtin::Msg => agent::msg(inv).await,
            Builtin::Ctx => agent::ctx(inv).await,
            Builtin::Tool => agent::call_tool(inv).await,
            Builtin::Prompt => agent::get_prompt(inv).await,
            Builtin::Resource => agent::read_resource(inv).await,
            Builtin::Tools => agent::list_tools(inv).await,
            Builtin::Prompts => agent::list_prompts(inv).await,
            Builtin::Resources => agent::list_resources(inv).await,
            Builtin::Connect => session::connect(inv).await,
            Builtin::Disconnect => session::disconnect(inv).await,
            Builtin::Status => session::status(inv).await,
            Builtin::Help => {
                inv.output.write_all(HELP.as_bytes()).await?;
                Ok(Control::Continue)
            }
            Builtin::Version => {
                inv.write_line(env!("CARGO_PKG_VERSION")).await?;
                Ok(Control::Continue)
            }
            Builtin::Exit => Ok(Control::Exit),
            Builtin::Cat => system::cat(inv).await,
            Builtin::Cd => system::cd(inv),
            Builtin::Clear => system::clear(inv).await,
            Builtin::Env => system::env(inv).await,
            Builtin::Export => system::export(inv).await,
            Builtin::Ls => system::ls(inv).await,
            Builtin::Pwd => system::pwd(inv).await,
        }
    }
}

/// Run one stage: a built-in if `argv[0]` names one, otherwise an external
/// process. The stage's endpoints are consumed and closed before returning.
pub async fn dispatch(
    shell: &Arc<Shell>,
    argv: Vec<String>,
    input: StageInput,
    output: StageOutput,
    cancel: &CancellationToken,
) -> Result<Control, ShellError> {
    let Some((name, args)) = argv.split_first() else {
        return Err(ShellError::Usage);
    };

    let Some(builtin) = Builtin::lookup(name) else {
        return run_external(shell, name, args, input, output).await;
    };

    let mut inv = Invocation {
        shell,
        args,
        input: input.into_reader()?,
        output: output.into_writer()?,
        cancel,
    };
    // `msg` watches the token itself so a cancelled turn still ends its line.
    let run = builtin.run(&mut inv);
    let result = if builtin == Builtin::Msg {
        run.await
    } else {
        match cancel.run_until_cancelled(run).await {
            Some(result) => result,
            None => {
                tracing::debug!(command = %name, "Stage cancelled");
                Ok(Control::Continue)
            }
        }
    };
    let flushed = inv.output.flush().await;
    let control = result?;
    flushed?;
    Ok(control)
}

async fn run_external(
    shell: &Shell,
    program: &str,
    args: &[String],
    input: StageInput,
    output: StageOutput,
) -> Result<Control, ShellError> {
    // The command holds the parent's copies of the pipe ends; dropping it right
    // after spawn leaves the child as their only owner.
    let mut child = {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .envs(shell.exported_vars())
            .stdin(input.into_stdio())
            .stdout(output.into_stdio())
            .stderr(std::process::Stdio::inherit());
        cmd.spawn().map_err(|source| ShellError::Spawn {
            program: program.to_string(),
            source,
        })?
    };

    let status = child.wait().await.map_err(|source| ShellError::Spawn {
        program: program.to_string(),
        source,
    })?;
    if !status.success() {
        return Err(ShellError::ExitStatus {
            program: program.to_string(),
            status,
        });
    }
    Ok(Control::Continue)
}

pub const HELP: &str = "\
Available Commands:
  tools                           List tools
  prompts                         List prompts
  resources                       List resources
  tool <name> [options]           Call tool
  prompt <name> [options]         Get prompt
  resource <uri>                  Read resource
  ctx <subcmd>                    LLM context operations
                                  (new, clear, dump, pop, ls, use <i>, del <i>, save)
  msg <message>                   Talk to LLM (msg - reads stdin)
  connect <server> [args]         Connect to server
  disconnect                      Disconnect from server
  status                          Show connection info

System Commands:
  cat <file>                      Read file
  cd [dir]                        Change working directory
  clear                           Clear the screen
  env                             Show environment variables
  export [name=value ...]         Set/get environment variables
  exit                            Exit the shell
  help                            Show this help message
  ls [dir]                        List files in directory
  pwd                             Print working directory
  version                         Show version information

Supports command pipelining and stdout redirection:
  tools | jq .name > tools.txt
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_the_same_builtin() {
        assert_eq!(Builtin::lookup("t"), Some(Builtin::Tool));
        assert_eq!(Builtin::lookup("tool"), Some(Builtin::Tool));
        assert_eq!(Builtin::lookup("T"), Some(Builtin::Tools));
        assert_eq!(Builtin::lookup("quit"), Some(Builtin::Exit));
        assert_eq!(Builtin::lookup("cls"), Some(Builtin::Clear));
    }

    #[test]
    fn unknown_names_fall_through() {
        assert_eq!(Builtin::lookup("grep"), None);
        assert_eq!(Builtin::lookup(""), None);
    }
}
