use async_trait::async_trait;
use http::StatusCode;
use httpd::handler::Handler;
use httpd::protocol::{Request, ResponseWriter};
use httpd::router::Router;
use httpd::server::Server;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

struct IndexHandler;

#[async_trait]
impl Handler for IndexHandler {
    async fn serve_http(&self, response: &mut ResponseWriter, request: &mut Request<'_>) {
        let name = request.query("name").unwrap_or("world").to_string();
        response.header_mut().set("Content-Type", "text/html; charset=utf-8");
        let page = format!("<html><body><h1>hello, {name}</h1></body></html>");
        let _ = response.write(page.as_bytes()).await;
    }
}

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn serve_http(&self, response: &mut ResponseWriter, request: &mut Request<'_>) {
        match request.body_mut().bytes().await {
            Ok(body) => {
                let _ = response.write(&body).await;
            }
            Err(_) => {
                response.set_status(StatusCode::BAD_REQUEST);
            }
        }
    }
}

struct UploadHandler;

#[async_trait]
impl Handler for UploadHandler {
    async fn serve_http(&self, response: &mut ResponseWriter, request: &mut Request<'_>) {
        match request.multipart_form().await {
            Ok(form) => {
                let mut summary = String::new();
                for (name, value) in &form.values {
                    summary.push_str(&format!("{name} = {value}\n"));
                }
                for (name, file) in &form.files {
                    summary.push_str(&format!("{name}: {} ({} bytes)\n", file.filename(), file.size()));
                }
                let _ = response.write(summary.as_bytes()).await;
            }
            Err(e) => {
                response.set_status(StatusCode::BAD_REQUEST);
                let _ = response.write(e.to_string().as_bytes()).await;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut router = Router::new();
    router.handle("/", IndexHandler);
    router.handle("/echo", EchoHandler);
    router.handle("/upload", UploadHandler);

    let server = Server::builder().address("127.0.0.1:8080").handler(router).build().expect("build server");
    server.start().await;
}
