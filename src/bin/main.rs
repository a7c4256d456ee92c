//! Binary entrypoint for the mindflow tool

#[tokio::main]
async fn main() {
    if let Err(e) = mindflow::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
