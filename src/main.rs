use notisync::app::EtlApp;

#[tokio::main]
async fn main() {
    let code = EtlApp::run().await;
    std::process::exit(code);
}
