fn main() {
    if let Err(err) = dmarc_ledger::cli::run() {
        dmarc_ledger::ui::eprintln_error(&err);
        std::process::exit(dmarc_ledger::exit::exit_code(&err));
    }
}
