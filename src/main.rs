use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use zkv::server::Server;
use zkv::SERVER_ADDR;

fn main() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let addr = SERVER_ADDR.parse().expect("static listen address parses");
    let mut server = match Server::bind(addr) {
        Ok(server) => server,
        Err(e) => {
            error!("startup failed: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = server.run() {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}
