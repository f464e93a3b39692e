use std::sync::Arc;

use clap::Parser;

use agnorpc::ObjectTable;
use agnorpc::Service;
use agnorpc::ServiceDescriptor;
use agnorpc::ServiceTable;

use crate::*;

fn empty_service(_: Arc<ObjectTable>) -> Arc<dyn Service> {
    Arc::new(ServiceTable::new(ServiceDescriptor::new("Empty")))
}

fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_args_defaults() -> anyhow::Result<()> {
    let args = ServerArgs::try_parse_from(["svc"])?;
    assert_eq!(args.mode, Mode::Simple);
    assert_eq!(args.host, "localhost");
    assert_eq!(args.port, 0);
    assert!(args.log.is_none());
    assert!(args.transport_config().compression_threshold.is_none());
    Ok(())
}

#[test]
fn test_args_library_alias() -> anyhow::Result<()> {
    let args = ServerArgs::try_parse_from(["svc", "-m", "library"])?;
    assert_eq!(args.mode, Mode::Lib);
    args.validate()?;

    let args = ServerArgs::try_parse_from(["svc", "--mode", "lib", "--compression", "1024"])?;
    assert_eq!(args.transport_config().compression_threshold, Some(1024));
    Ok(())
}

#[test]
fn test_port_required_outside_library_mode() -> anyhow::Result<()> {
    let args = ServerArgs::try_parse_from(["svc", "-m", "threaded"])?;
    assert!(matches!(args.validate(), Err(Error::Config(_))));

    let args = ServerArgs::try_parse_from(["svc", "-m", "threaded", "-p", "17731"])?;
    args.validate()?;
    Ok(())
}

#[test]
fn test_unknown_mode_rejected() {
    assert!(ServerArgs::try_parse_from(["svc", "-m", "forking"]).is_err());
}

#[test]
fn test_parse_banner() {
    assert_eq!(
        child::parse_banner(&lines(&["AGNOS", "localhost", "4411"])),
        Some(("localhost".to_string(), 4411))
    );
    assert_eq!(child::parse_banner(&lines(&["Traceback", "localhost", "4411"])), None);
    assert_eq!(child::parse_banner(&lines(&["AGNOS", "localhost", "port"])), None);
    assert_eq!(child::parse_banner(&lines(&["AGNOS", "", "4411"])), None);
    assert_eq!(child::parse_banner(&lines(&["AGNOS"])), None);
}

#[test]
fn test_startup_failure_shows_output() {
    let err = Error::StartupFailed { banner: "oops".into(), output: "missing library".into() };
    let text = err.to_string();
    assert!(text.contains("oops"));
    assert!(text.contains("missing library"));
}

#[tokio::test]
async fn test_library_banner_reports_bound_port() -> anyhow::Result<()> {
    let server = LibraryModeServer::bind("127.0.0.1", 0, Arc::new(empty_service), Default::default()).await?;
    let port = server.local_addr()?.port();
    assert_ne!(port, 0);
    assert_eq!(server.banner()?, format!("AGNOS\n127.0.0.1\n{}\n\n", port));
    Ok(())
}
