use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::Request;
use hyper::Response;
use hyper::body::Bytes;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use agnopack::Packer;
use agnopack::Registry;
use agnopack::Value;
use agnorpc::ClientUtils;
use agnorpc::Function;
use agnorpc::InfoCode;
use agnorpc::ObjectTable;
use agnorpc::Processor;
use agnorpc::Service;
use agnorpc::ServiceDescriptor;
use agnorpc::ServiceTable;
use agnowire::Transport;
use agnowire::TransportConfig;

async fn add(args: Vec<Value>) -> anyhow::Result<Value> {
    let a = args[0].as_i32().unwrap_or_default();
    let b = args[1].as_i32().unwrap_or_default();
    Ok(Value::Int32(a + b))
}

fn adder(_: Arc<ObjectTable>) -> Arc<dyn Service> {
    Arc::new(
        ServiceTable::new(ServiceDescriptor::new("Adder").supports("2.0")).with_function(
            Function::new(1, "add", add)
                .arg("a", "int32", Packer::Int32)
                .arg("b", "int32", Packer::Int32)
                .returns("int32", Packer::Int32),
        ),
    )
}

/// Runs one request frame through a fresh processor and returns whatever it wrote.
async fn answer(frame: &[u8]) -> anyhow::Result<Vec<u8>> {
    let (mut ours, theirs) = tokio::io::duplex(1 << 20);
    let processor = Processor::new(Arc::new(Transport::new(theirs, TransportConfig::default())), &adder);
    ours.write_all(frame).await?;
    processor.process().await?;
    drop(processor);

    let mut reply = Vec::new();
    ours.read_to_end(&mut reply).await?;
    Ok(reply)
}

async fn endpoint(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let frame = req.into_body().collect().await?.to_bytes();
    let reply = answer(&frame).await.unwrap_or_default();
    Ok(Response::new(Full::new(Bytes::from(reply))))
}

async fn serve_http() -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(endpoint))
                    .await;
            });
        }
    });
    Ok(addr)
}

#[tokio::test]
async fn test_calls_over_http() -> anyhow::Result<()> {
    let addr = serve_http().await?;
    let url = format!("http://{}/adder", addr);
    let client = ClientUtils::connect_url(&url, TransportConfig::default(), Registry::new()).await?;

    client.ping("over http", Some(Duration::from_secs(5))).await?;
    client.check_service("Adder", Some("2.0")).await?;

    let args = [(Packer::Int32, Value::Int32(19)), (Packer::Int32, Value::Int32(23))];
    assert_eq!(client.invoke(1, &args, Some(Packer::Int32)).await?, Value::Int32(42));

    let functions = client.get_service_info(InfoCode::Functions).await?;
    assert_eq!(functions.get_map(1).and_then(|f| f.get_str("name")), Some("add"));
    Ok(())
}

#[tokio::test]
async fn test_requests_without_reply_over_http() -> anyhow::Result<()> {
    let addr = serve_http().await?;
    let client =
        ClientUtils::connect_url(&format!("http://{}/", addr), TransportConfig::default(), Registry::new()).await?;

    client.decref(7).await?;
    client.quit().await?;
    client.ping("still answered", None).await?;
    assert_eq!(client.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn test_raw_tunnel_over_http() -> anyhow::Result<()> {
    let addr = serve_http().await?;
    let client =
        ClientUtils::connect_url(&format!("http://{}/", addr), TransportConfig::default(), Registry::new()).await?;

    // PING "ok"
    let seq = client.tunnel_request(&[0, 0, 0, 0, 2, b'o', b'k']).await?;
    let raw = client.get_reply(seq, None).await?;
    assert_eq!(raw.as_bytes(), Some(&[0, 0, 0, 2, b'o', b'k'][..]));
    Ok(())
}
