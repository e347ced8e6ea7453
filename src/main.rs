use anyhow::Context;
use jobsh::Interpreter;
use jobsh::readline::{EditorReader, StreamReader};
use jobsh::terminal;

fn run() -> anyhow::Result<i32> {
    let interactive = terminal::stdin_is_terminal();
    log::debug!("starting, interactive={}", interactive);

    let mut shell = Interpreter::new(interactive);
    let code = if interactive {
        let mut reader = EditorReader::new().context("cannot start line editor")?;
        shell.repl(&mut reader)
    } else {
        let mut reader = StreamReader::new(std::io::stdin().lock());
        shell.repl(&mut reader)
    };
    Ok(code)
}

fn main() {
    env_logger::init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("jobsh: {e:#}");
            std::process::exit(1);
        }
    }
}
