fn main() {
    if let Err(e) = f1_predictor_lib::run() {
        eprintln!("f1-predictor: {e}");
        std::process::exit(1);
    }
}
