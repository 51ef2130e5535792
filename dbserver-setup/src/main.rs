use clap::Parser;

use dbserver_setup::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match dbserver_setup::run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("[PHASE: shutdown] Setup command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
