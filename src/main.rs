use std::process;

fn main() {
    env_logger::init();

    match testrig::run_cli(std::env::args_os()) {
        Ok(summary) => {
            let code = if summary.total == 0 || summary.all_passed() {
                0
            } else {
                1
            };
            process::exit(code);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    }
}
