//! Binary entry point for the Thornmoor world server.

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lib_thornmoor::init().await
}
