use std::collections::HashMap;
use std::io::Read as _;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// Serves fixed HTML pages plus the link-add and webhook endpoints.
///
/// `POST /add` accepts, `POST /reject` answers 200 with `"success": false`,
/// `POST /hook` collects notifications.
pub struct SiteStub {
    pub base_url: String,
    pages: Arc<Mutex<HashMap<String, String>>>,
    added: Arc<Mutex<Vec<Value>>>,
    notices: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SiteStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start site stub server");
        let base_url = format!("http://{}", server.server_addr());

        let pages = Arc::new(Mutex::new(HashMap::<String, String>::new()));
        let added = Arc::new(Mutex::new(Vec::new()));
        let notices = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = {
            let pages = Arc::clone(&pages);
            let added = Arc::clone(&added);
            let notices = Arc::clone(&notices);
            thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let path = request.url().to_string();
                    if request.method() != &tiny_http::Method::Post {
                        let page = pages.lock().expect("pages lock").get(&path).cloned();
                        let response = match page {
                            Some(html) => tiny_http::Response::from_string(html).with_header(
                                tiny_http::Header::from_bytes(
                                    &b"Content-Type"[..],
                                    &b"text/html; charset=utf-8"[..],
                                )
                                .expect("build header"),
                            ),
                            None => tiny_http::Response::from_string("not found")
                                .with_status_code(404),
                        };
                        let _ = request.respond(response);
                        continue;
                    }

                    let mut body = String::new();
                    if request.as_reader().read_to_string(&mut body).is_err() {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid request body")
                                .with_status_code(400),
                        );
                        continue;
                    }
                    let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

                    let response = match path.as_str() {
                        "/add" => {
                            added.lock().expect("added lock").push(parsed);
                            tiny_http::Response::from_string(r#"{"success": true}"#)
                        }
                        "/reject" => tiny_http::Response::from_string(
                            r#"{"success": false, "error": "device offline"}"#,
                        ),
                        "/hook" => {
                            let content = parsed
                                .get("content")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned();
                            notices.lock().expect("notices lock").push(content);
                            tiny_http::Response::from_string("").with_status_code(204)
                        }
                        _ => tiny_http::Response::from_string("not found").with_status_code(404),
                    };
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            base_url,
            pages,
            added,
            notices,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn set_page(&self, path: &str, html: impl Into<String>) {
        self.pages
            .lock()
            .expect("pages lock")
            .insert(path.to_owned(), html.into());
    }

    pub fn added(&self) -> Vec<Value> {
        self.added.lock().expect("added lock").clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().expect("notices lock").clone()
    }
}

impl Drop for SiteStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
