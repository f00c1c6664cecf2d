use std::process::ExitCode;

fn main() -> ExitCode {
    room_styler::run(std::env::args_os(), &mut std::io::stdout().lock(), std::io::stderr)
}
