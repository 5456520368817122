use std::process::ExitCode;

fn main() -> ExitCode {
    yansi::whenever(yansi::Condition::TTY_AND_COLOR);

    match blobbench::cli::execute() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:?}");
            ExitCode::from(2)
        }
    }
}
