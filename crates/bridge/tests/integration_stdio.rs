mod common;

use common::{StdioSession, bridge_bin, echoed_backend_body, spawn_backend, tool_names, write_spec};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

async fn connect(extra_args: &[&str]) -> anyhow::Result<(StdioSession, tempfile::NamedTempFile)> {
    let base_url = spawn_backend().await?;
    let spec = write_spec(&base_url)?;
    let spec_path = spec.path().to_str().expect("utf8 path").to_string();

    let mut args = vec![spec_path.as_str(), "-t", "stdio"];
    args.extend_from_slice(extra_args);
    let session = StdioSession::spawn(bridge_bin(), &args)?;
    Ok((session, spec))
}

#[tokio::test]
async fn initialize_list_and_call_round_trip() -> anyhow::Result<()> {
    let (mut session, _spec) = connect(&[]).await?;

    session
        .send_request(0, "initialize", json!({"protocolVersion": "2024-11-05"}))
        .await?;
    let init = session.recv_frame(FRAME_TIMEOUT).await?;
    assert_eq!(init["id"], json!(0));
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");

    session.send_request(1, "tools/list", json!({})).await?;
    let list = session.recv_frame(FRAME_TIMEOUT).await?;
    let names = tool_names(&list);
    for expected in ["listPets", "getPet", "createPet", "adminStats", "slowCall"] {
        assert!(names.contains(&expected.to_string()), "missing {expected}");
    }

    session
        .send_request(
            2,
            "tools/call",
            json!({"name": "getPet", "arguments": {"petId": "7"}}),
        )
        .await?;
    let call = session.recv_frame(FRAME_TIMEOUT).await?;
    let echoed = echoed_backend_body(&call)?;
    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["path"], "/pets/7");

    Ok(())
}

#[tokio::test]
async fn concurrent_calls_complete_with_unique_correlation_ids() -> anyhow::Result<()> {
    let (mut session, _spec) = connect(&[]).await?;

    // Stagger sleep times so completions arrive out of request order.
    const N: i64 = 8;
    for i in 0..N {
        let ms = 100 + (N - i) * 50;
        session
            .send_request(
                10 + i,
                "tools/call",
                json!({"name": "slowCall", "arguments": {"ms": ms}}),
            )
            .await?;
    }

    let mut seen: HashSet<i64> = HashSet::new();
    for _ in 0..N {
        let frame = session.recv_frame(FRAME_TIMEOUT).await?;
        // Every frame parsed as standalone JSON; interleaving or truncation
        // would have failed the parse in recv_frame.
        let id = frame["id"].as_i64().expect("numeric id");
        assert!(seen.insert(id), "correlation id {id} appeared twice");
        assert!(frame["result"].is_object(), "frame was not a result: {frame}");
    }
    assert_eq!(seen, (10..10 + N).collect::<HashSet<i64>>());

    Ok(())
}

#[tokio::test]
async fn malformed_frame_is_recoverable() -> anyhow::Result<()> {
    let (mut session, _spec) = connect(&[]).await?;

    session.send_line("{this is not json").await?;
    let err = session.recv_frame(FRAME_TIMEOUT).await?;
    assert_eq!(err["id"], json!(null));
    assert_eq!(err["error"]["code"], json!(-32700));

    // The session survives the bad frame.
    session.send_request(5, "ping", json!({})).await?;
    let pong = session.recv_frame(FRAME_TIMEOUT).await?;
    assert_eq!(pong["id"], json!(5));
    assert!(pong["result"].is_object());

    Ok(())
}

#[tokio::test]
async fn unknown_tool_is_an_error_with_the_request_id() -> anyhow::Result<()> {
    let (mut session, _spec) = connect(&[]).await?;

    session
        .send_request(9, "tools/call", json!({"name": "doesNotExist"}))
        .await?;
    let err = session.recv_frame(FRAME_TIMEOUT).await?;
    assert_eq!(err["id"], json!(9));
    assert_eq!(err["error"]["code"], json!(-32601));
    assert!(
        err["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .contains("doesNotExist")
    );

    Ok(())
}

#[tokio::test]
async fn closing_stdin_drains_and_exits_zero() -> anyhow::Result<()> {
    let (mut session, _spec) = connect(&[]).await?;

    session.send_request(1, "ping", json!({})).await?;
    let pong = session.recv_frame(FRAME_TIMEOUT).await?;
    assert_eq!(pong["id"], json!(1));

    let status = session.shutdown(Duration::from_secs(15)).await?;
    assert!(status.success(), "expected exit 0, got {status}");

    Ok(())
}

#[tokio::test]
async fn filters_reduce_the_exposed_catalog() -> anyhow::Result<()> {
    let (mut session, _spec) =
        connect(&["--methods", "GET", "--include-paths", "/pets/.*"]).await?;

    session.send_request(1, "tools/list", json!({})).await?;
    let list = session.recv_frame(FRAME_TIMEOUT).await?;
    assert_eq!(tool_names(&list), vec!["getPet".to_string()]);

    Ok(())
}

#[tokio::test]
async fn query_auth_is_injected_into_backend_calls() -> anyhow::Result<()> {
    let (mut session, _spec) = connect(&[
        "--auth-type",
        "api_key",
        "--api-key",
        "SECRET",
        "--api-key-location",
        "query",
        "--api-key-param-name",
        "key",
    ])
    .await?;

    session
        .send_request(
            1,
            "tools/call",
            json!({"name": "listPets", "arguments": {"limit": 5}}),
        )
        .await?;
    let frame = session.recv_frame(FRAME_TIMEOUT).await?;
    let echoed = echoed_backend_body(&frame)?;
    assert_eq!(echoed["query"], "limit=5&key=SECRET");

    Ok(())
}
