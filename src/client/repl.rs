//! Plain line-by-line chat, used when stdin or stdout is not a terminal.

use super::session::{classify, Input, Session};
use super::socket::Client;
use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub async fn run_line_chat<R, W>(client: &Client, stream: bool, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "Qwen chat ('exit' to quit, 'clear' to reset the conversation)")?;

    let mut lines = input.lines();
    let mut session = Session::new();

    loop {
        write!(out, "you: ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };

        match classify(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Clear => {
                session.clear();
                writeln!(out, "History cleared")?;
            }
            Input::Prompt(prompt) => {
                session.begin_turn(prompt);
                write!(out, "qwen: ")?;
                out.flush()?;

                let result = client
                    .chat(session.history(), stream, |chunk| {
                        write!(out, "{}", chunk)?;
                        out.flush()?;
                        Ok(())
                    })
                    .await;
                writeln!(out)?;

                match result {
                    Ok(reply) => session.finish_turn(reply.text),
                    Err(e) => {
                        session.abandon_turn();
                        writeln!(out, "error: {:#}", e)?;
                    }
                }
            }
        }
    }

    writeln!(out, "Bye")?;
    Ok(())
}
