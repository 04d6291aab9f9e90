//! Wire-level tests of the HTTP gallery client against a minimal in-process web service.

use gallery_sync::gallery::GalleryClient;
use gallery_sync_core::contract::{CategoryApi, ImageApi, NewImage, RemoteFileState, SessionApi};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request as seen by the fake service.
#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    fields: HashMap<String, String>,
    cookie: Option<String>,
}

type Responder = dyn Fn(&str, &HashMap<String, String>) -> (String, Option<String>) + Send + Sync;

struct FakeService {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeService {
    /// `respond` returns the JSON body and an optional `Set-Cookie` value per web-service method.
    async fn start<F>(respond: F) -> FakeService
    where
        F: Fn(&str, &HashMap<String, String>) -> (String, Option<String>) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let recorded = recorded.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    handle(stream, recorded, respond).await;
                });
            }
        });

        FakeService {
            base_url: format!("http://{addr}/gallery"),
            requests,
        }
    }

    fn client(&self) -> GalleryClient {
        GalleryClient::new(&self.base_url, "alice", "secret").unwrap()
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.method).collect()
    }
}

async fn handle(mut stream: TcpStream, recorded: Arc<Mutex<Vec<Recorded>>>, respond: Arc<Responder>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut content_length = 0usize;
    let mut cookie = None;
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap(),
                "cookie" => cookie = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    let fields: HashMap<String, String> = Url::parse(&format!("http://form/?{body}"))
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let method = fields.get("method").cloned().unwrap_or_default();

    let (json, set_cookie) = respond(&method, &fields);
    recorded.lock().unwrap().push(Recorded {
        method,
        fields,
        cookie,
    });

    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        json.len()
    );
    if let Some(value) = set_cookie {
        response.push_str(&format!("Set-Cookie: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(&json);
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();
}

fn ok(result: &str) -> (String, Option<String>) {
    (format!(r#"{{"stat":"ok","result":{result}}}"#), None)
}

#[tokio::test]
async fn login_keeps_the_session_cookie_and_reads_the_chunk_size() {
    let service = FakeService::start(|method, _| match method {
        "pwg.session.login" => (
            r#"{"stat":"ok","result":true}"#.to_string(),
            Some("pwg_id=session42; Path=/".to_string()),
        ),
        "pwg.session.getStatus" => ok(r#"{"username":"alice","pwg_token":"tok","upload_form_chunk_size":"500"}"#),
        _ => ok("null"),
    })
    .await;

    let session = service.client().login().await.unwrap();
    assert_eq!(session.username, "alice");
    assert_eq!(session.chunk_size_kb, 500);

    let requests = service.requests();
    assert_eq!(service.methods(), vec!["pwg.session.login", "pwg.session.getStatus"]);
    assert_eq!(requests[0].fields["username"], "alice");
    assert_eq!(requests[0].fields["password"], "secret");
    assert_eq!(requests[1].cookie.as_deref(), Some("pwg_id=session42"));
}

#[tokio::test]
async fn failed_envelope_becomes_an_error() {
    let service = FakeService::start(|_, _| {
        (
            r#"{"stat":"fail","err":999,"message":"Invalid username/password"}"#.to_string(),
            None,
        )
    })
    .await;

    let err = service.client().login().await.unwrap_err();
    assert!(
        err.to_string().contains("Invalid username/password"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn categories_are_listed_with_resolved_keys_and_created_under_parents() {
    let service = FakeService::start(|method, _| match method {
        "pwg.categories.getList" => ok(
            r#"{"categories":[
                {"id":"2","name":"trip","id_uppercat":"1"},
                {"id":1,"name":"2024","id_uppercat":null}
            ]}"#,
        ),
        "pwg.categories.add" => ok(r#"{"id":7,"info":"Album added"}"#),
        _ => ok("null"),
    })
    .await;
    let client = service.client();

    let categories = client.list_categories().await.unwrap();
    let keys: Vec<&str> = categories.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["2024", "2024/trip"]);

    assert_eq!(client.create_category(0, "root").await.unwrap(), 7);
    assert_eq!(client.create_category(2, "day1").await.unwrap(), 7);

    let requests = service.requests();
    assert_eq!(requests[0].fields["recursive"], "true");
    assert!(!requests[1].fields.contains_key("parent"));
    assert_eq!(requests[2].fields["parent"], "2");
    assert_eq!(requests[2].fields["name"], "day1");
}

#[tokio::test]
async fn image_calls_send_the_expected_fields() {
    let service = FakeService::start(|method, _| match method {
        "pwg.images.exist" => ok(r#"{"aaa":"12","bbb":null}"#),
        "pwg.images.checkFiles" => ok(r#"{"file":"equals"}"#),
        "pwg.images.add" => ok(r#"{"image_id":"31","url":"picture.php?/31"}"#),
        _ => ok("null"),
    })
    .await;
    let client = service.client();

    let existing = client
        .images_exist(&["aaa".to_string(), "bbb".to_string()])
        .await
        .unwrap();
    assert_eq!(existing["aaa"], 12);
    assert_eq!(existing["bbb"], 0);

    assert_eq!(
        client.check_file(12, "aaa").await.unwrap(),
        RemoteFileState::Equal
    );

    client.add_chunk("ccc", 1, "AAEC".to_string()).await.unwrap();
    let id = client
        .add_image(NewImage {
            checksum: "ccc".into(),
            filename: "beach.jpg".into(),
            category_id: 4,
            image_id: None,
        })
        .await
        .unwrap();
    assert_eq!(id, 31);

    let requests = service.requests();
    assert_eq!(requests[0].fields["md5sum_list"], "aaa|bbb");
    assert_eq!(requests[1].fields["image_id"], "12");
    assert_eq!(requests[1].fields["file_sum"], "aaa");
    assert_eq!(requests[2].fields["data"], "AAEC");
    assert_eq!(requests[2].fields["type"], "file");
    assert_eq!(requests[2].fields["position"], "1");
    assert_eq!(requests[3].fields["original_filename"], "beach.jpg");
    assert_eq!(requests[3].fields["categories"], "4");
    assert!(!requests[3].fields.contains_key("image_id"));
}

#[tokio::test]
async fn delete_fetches_a_token_first() {
    let service = FakeService::start(|method, _| match method {
        "pwg.session.getStatus" => ok(r#"{"username":"alice","pwg_token":"tok"}"#),
        _ => ok("null"),
    })
    .await;

    service.client().delete_images(&[5, 9]).await.unwrap();

    let requests = service.requests();
    assert_eq!(service.methods(), vec!["pwg.session.getStatus", "pwg.images.delete"]);
    assert_eq!(requests[1].fields["image_id"], "5|9");
    assert_eq!(requests[1].fields["pwg_token"], "tok");
}

#[tokio::test]
async fn delete_without_a_token_is_refused() {
    let service = FakeService::start(|method, _| match method {
        "pwg.session.getStatus" => ok(r#"{"username":"guest","pwg_token":""}"#),
        _ => ok("null"),
    })
    .await;

    assert!(service.client().delete_images(&[5]).await.is_err());
    assert_eq!(service.methods(), vec!["pwg.session.getStatus"]);
}
