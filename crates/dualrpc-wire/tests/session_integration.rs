//! End-to-end tests over real TCP connections through `RpcServer`.

use dualrpc_wire::{
    connect, Args, LocalObject, RpcServer, ServerConfig, Session, SessionConfig, Variant,
    VariantMap, WireError, WireResult,
};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

fn boo(args: Args) -> WireResult<Variant> {
    let name = args.require(0, "name")?.clone();
    Ok(VariantMap::new()
        .with("name", name)
        .with("fam", "Smirnov")
        .into())
}

async fn foo(session: &mut Session, args: Args) -> WireResult<Variant> {
    let obj = args
        .require(0, "obj")?
        .as_remote()
        .copied()
        .ok_or_else(|| WireError::InvalidArgument("obj must be an object".to_string()))?;
    let reply = obj
        .call(session, "boo", Args::new().kwarg("name", "Sergey"))
        .await?;
    let mut map = reply.as_map().cloned().unwrap_or_default();
    map.insert("otch", "Petrovich");
    Ok(Variant::Map(map))
}

async fn start_server() -> Arc<RpcServer> {
    let root = LocalObject::new()
        .method("boo", boo)
        .session_method("foo", |session, args| foo(session, args).boxed());
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    };
    let (server, _task) = RpcServer::start(config, Arc::new(root)).await.unwrap();
    server
}

#[tokio::test]
async fn test_boo_over_tcp() {
    let server = start_server().await;
    let mut session = connect(server.local_addr(), &SessionConfig::default(), None)
        .await
        .unwrap();

    let root = session.root();
    let result = session
        .call(&root, "boo", Args::new().arg("Ivan"))
        .await
        .unwrap();
    assert_eq!(
        result,
        Variant::Map(VariantMap::new().with("name", "Ivan").with("fam", "Smirnov"))
    );
}

#[tokio::test]
async fn test_callback_over_tcp() {
    let server = start_server().await;
    let mut session = connect(server.local_addr(), &SessionConfig::default(), None)
        .await
        .unwrap();

    let person = LocalObject::new().method("boo", boo);
    let root = session.root();
    let result = session
        .call(&root, "foo", Args::new().arg(Variant::object(person)))
        .await
        .unwrap();
    assert_eq!(
        result,
        Variant::Map(
            VariantMap::new()
                .with("name", "Sergey")
                .with("fam", "Smirnov")
                .with("otch", "Petrovich")
        )
    );
}

#[tokio::test]
async fn test_sessions_get_distinct_ids() {
    let server = start_server().await;
    let config = SessionConfig::default();
    let first = connect(server.local_addr(), &config, None).await.unwrap();
    let second = connect(server.local_addr(), &config, None).await.unwrap();

    assert_ne!(first.id(), 0);
    assert_ne!(first.id(), second.id());
    assert_eq!(server.sessions().count(), 2);

    drop(first);
    drop(second);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.sessions().count(), 0);
}

#[tokio::test]
async fn test_frame_limit_closes_session() {
    let server = start_server().await;
    let mut session = connect(server.local_addr(), &SessionConfig::default(), None)
        .await
        .unwrap();
    // The server accepts at most 1 MiB per frame.
    let big = "x".repeat(2 * 1024 * 1024);
    let root = session.root();
    let err = session
        .call(&root, "boo", Args::new().arg(big))
        .await
        .unwrap_err();
    assert!(err.is_fatal(), "unexpected error: {err}");
}
