use acorn::proto::cache_client::CacheClient;
use acorn::proto::{DeleteRequest, GetRequest, InfoRequest};
use acorn::{new_group, FnLoader, GroupConfig, NodeServer, PeerClient, PeerGetter};
use std::time::Duration;
use tempfile::TempDir;

async fn start_node(addr: &str) {
    let server = NodeServer::new(addr.parse().unwrap());
    tokio::spawn(async move { server.run().await.unwrap() });
    // Let the node start up.
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn serves_get_info_and_delete() {
    new_group(
        GroupConfig {
            name: "rpc_scores".into(),
            cache_bytes: 2 << 10,
            ..Default::default()
        },
        FnLoader(|key: &str| Ok(format!("value-{key}").into_bytes())),
    )
    .unwrap();
    start_node("127.0.0.1:7411").await;

    // The same path a routing peer takes on a remote fetch.
    let peer = PeerClient::new("127.0.0.1:7411");
    assert_eq!(
        peer.get("rpc_scores", "Tom").await.unwrap(),
        b"value-Tom"
    );

    let mut client = CacheClient::connect("http://127.0.0.1:7411")
        .await
        .unwrap();
    let info = client
        .info(InfoRequest {
            group: "rpc_scores".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.keys_num, 1);
    assert_eq!(info.max_used_bytes, 2 << 10);

    let ack = client
        .delete(DeleteRequest {
            group: "rpc_scores".into(),
            key: "Tom".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(ack.success);

    let info = client
        .info(InfoRequest {
            group: "rpc_scores".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.keys_num, 0);
}

#[tokio::test]
async fn unknown_group_is_not_found() {
    start_node("127.0.0.1:7412").await;

    let mut client = CacheClient::connect("http://127.0.0.1:7412")
        .await
        .unwrap();
    let err = client
        .get(GetRequest {
            group: "no_such_group".into(),
            key: "k".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);

    let peer = PeerClient::new("127.0.0.1:7412");
    assert!(peer.get("no_such_group", "k").await.is_err());
}

#[tokio::test]
async fn backup_rpc_merges_and_copies() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let group = new_group(
        GroupConfig {
            name: "rpc_backup".into(),
            persistence_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        },
        FnLoader(|key: &str| Ok(key.as_bytes().to_vec())),
    )
    .unwrap();
    group.get("a").await.unwrap();
    start_node("127.0.0.1:7413").await;

    let mut client = CacheClient::connect("http://127.0.0.1:7413")
        .await
        .unwrap();
    let ack = client
        .backup(InfoRequest {
            group: "rpc_backup".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(ack.success);

    let backups = std::fs::read_dir(temp_dir.path().join("rpc_backup"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with("append.data.") && !name.ends_with(".merge") && !name.ends_with(".bak")
        })
        .count();
    assert_eq!(backups, 1);
}
