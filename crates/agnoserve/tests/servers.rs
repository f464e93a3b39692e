use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;

use agnopack::ObjectRef;
use agnopack::Packer;
use agnopack::Registry;
use agnopack::Value;
use agnorpc::ClientUtils;
use agnorpc::Function;
use agnorpc::ObjectTable;
use agnorpc::Service;
use agnorpc::ServiceDescriptor;
use agnorpc::ServiceFactory;
use agnorpc::ServiceTable;
use agnoserve::Error;
use agnoserve::LibraryModeServer;
use agnoserve::SimpleServer;
use agnoserve::ThreadedServer;
use agnowire::TransportConfig;

const ECHO_BIN: &str = env!("CARGO_BIN_EXE_agnos-echo");

async fn add(args: Vec<Value>) -> anyhow::Result<Value> {
    let a = args[0].as_i32().unwrap_or_default();
    let b = args[1].as_i32().unwrap_or_default();
    Ok(Value::Int32(a + b))
}

async fn make_object(_: Vec<Value>) -> anyhow::Result<Value> {
    Ok(Value::Object(ObjectRef::new(())))
}

fn arith(objects: Arc<ObjectTable>) -> Arc<dyn Service> {
    let handle = Packer::obj_ref(2100, objects);
    Arc::new(
        ServiceTable::new(ServiceDescriptor::new("Arith").supports("1.0"))
            .with_function(
                Function::new(1, "add", add)
                    .arg("a", "int32", Packer::Int32)
                    .arg("b", "int32", Packer::Int32)
                    .returns("int32", Packer::Int32),
            )
            .with_function(Function::new(2, "make_object", make_object).returns("Thing", handle)),
    )
}

fn factory() -> Arc<dyn ServiceFactory> {
    Arc::new(arith)
}

async fn connect(port: u16) -> anyhow::Result<ClientUtils> {
    Ok(ClientUtils::connect("127.0.0.1", port, TransportConfig::default(), Registry::new()).await?)
}

async fn add_remote(client: &ClientUtils, a: i32, b: i32) -> anyhow::Result<i32> {
    let args = [(Packer::Int32, Value::Int32(a)), (Packer::Int32, Value::Int32(b))];
    let sum = client.invoke(1, &args, Some(Packer::Int32)).await?;
    sum.as_i32().ok_or_else(|| anyhow::anyhow!("not an int32: {:?}", sum))
}

#[tokio::test]
async fn test_threaded_server_serves_clients_in_parallel() -> anyhow::Result<()> {
    let server = ThreadedServer::bind("127.0.0.1", 0, factory(), TransportConfig::default()).await?;
    let port = server.local_addr()?.port();
    let accept_loop = tokio::spawn(async move { server.serve().await });

    let mut clients = Vec::new();
    for n in 0..4 {
        clients.push(tokio::spawn(async move {
            let client = connect(port).await?;
            for i in 0..25 {
                assert_eq!(add_remote(&client, n, i).await?, n + i);
            }
            // Every connection has its own object table, so handles restart at 0.
            let handle = client.invoke(2, &[], Some(Packer::Int64)).await?;
            assert_eq!(handle, Value::Int64(0));
            client.quit().await?;
            anyhow::Ok(())
        }));
    }
    for client in clients {
        client.await??;
    }
    accept_loop.abort();
    Ok(())
}

#[tokio::test]
async fn test_simple_server_serves_clients_in_turn() -> anyhow::Result<()> {
    let server = SimpleServer::bind("127.0.0.1", 0, factory(), TransportConfig::compressed()).await?;
    let port = server.local_addr()?.port();
    let accept_loop = tokio::spawn(async move { server.serve().await });

    for round in 0..3 {
        let client = ClientUtils::connect("127.0.0.1", port, TransportConfig::compressed(), Registry::new()).await?;
        assert_eq!(add_remote(&client, round, 100).await?, round + 100);
        client.close().await?;
    }
    accept_loop.abort();
    Ok(())
}

#[tokio::test]
async fn test_library_mode_announces_and_serves_once() -> anyhow::Result<()> {
    let server = LibraryModeServer::bind("127.0.0.1", 0, factory(), TransportConfig::default()).await?;
    let (mut banner_out, banner_in) = tokio::io::duplex(256);
    let serving = tokio::spawn(async move { server.serve(&mut banner_out).await });

    let mut banner = BufReader::new(banner_in).lines();
    let mut lines = Vec::new();
    for _ in 0..3 {
        lines.push(banner.next_line().await?.unwrap_or_default());
    }
    let (host, port) = agnoserve::child::parse_banner(&lines).ok_or_else(|| anyhow::anyhow!("bad banner {:?}", lines))?;
    assert_eq!(host, "127.0.0.1");

    let client = connect(port).await?;
    client.ping("library", None).await?;
    assert_eq!(add_remote(&client, 20, 22).await?, 42);
    client.quit().await?;

    serving.await??;
    // The listener is gone with the served connection.
    assert!(connect(port).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_child_process_in_library_mode() -> anyhow::Result<()> {
    let child = agnoserve::spawn_library_server(ECHO_BIN, &[], Registry::new()).await?;
    let client = child.client();

    client.check_service("Echo", Some("1.0")).await?;
    let echoed = client.invoke(1, &[(Packer::Str, Value::from("over a pipe"))], Some(Packer::Str)).await?;
    assert_eq!(echoed.as_str(), Some("over a pipe"));

    child.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_child_that_fails_to_start() -> anyhow::Result<()> {
    // Threaded mode without a port is rejected before anything is printed.
    match agnoserve::spawn_library_server(ECHO_BIN, &["-m", "threaded"], Registry::new()).await {
        Err(Error::StartupFailed { banner, output }) => {
            assert!(!banner.contains("AGNOS"));
            assert!(output.contains("must specify port"), "{}", output);
        }
        Err(other) => panic!("expected startup failure, got {}", other),
        Ok(_) => panic!("expected startup failure"),
    }
    Ok(())
}
