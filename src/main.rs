fn main() {
    match infralens::cli::run() {
        Ok(code) => std::process::exit(code.as_i32()),
        Err(err) => {
            infralens::ui::eprintln_error(&err);
            std::process::exit(infralens::exit::exit_code(&err));
        }
    }
}
