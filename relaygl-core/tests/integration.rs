//! Integration tests — frame sessions over real TCP and TLS connections
//! on localhost, plus failure scenarios.

use std::path::PathBuf;
use std::time::Duration;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use relaygl_core::channel::encode_frame;
use relaygl_core::transport::active_leases;
use relaygl_core::{
    CodecId, Connection, Frame, FrameReceiver, FrameSender, Listener, SenderOptions,
    SessionError, Subsampling, TlsSettings, TransportError,
};
use tokio::task::JoinHandle;

// ── Helpers ──────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_secs(10);

/// Accept one session on `listener` and collect every frame it carries.
fn spawn_collector(listener: Listener) -> JoinHandle<Result<Vec<Frame>, SessionError>> {
    tokio::spawn(async move {
        let conn = listener.accept().await?;
        let mut rx = FrameReceiver::new(conn)?;
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    })
}

fn patterned(sender: &FrameSender, window: u64, shade: u8) -> Frame {
    let mut frame = sender.frame(301, 301, 3);
    for (i, b) in frame.pixels.iter_mut().enumerate() {
        *b = if i % 2 == 0 { shade } else { !shade };
    }
    frame.quality = 50;
    frame.subsampling = Subsampling::S411;
    frame.window_id = window;
    frame
}

fn temp_pem(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("relaygl-{}-{name}.pem", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

/// A CA plus a `localhost` server certificate it signed, as PEM files.
fn ca_and_server_files() -> (TlsSettings, TlsSettings) {
    let mut ca_params = CertificateParams::default();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "relaygl test CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let server_key = KeyPair::generate().unwrap();
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .unwrap();

    let server = TlsSettings {
        cert: Some(temp_pem("server-cert", &server_cert.pem())),
        key: Some(temp_pem("server-key", &server_key.serialize_pem())),
        ..Default::default()
    };
    let client = TlsSettings {
        ca_cert: Some(temp_pem("ca", &ca_cert.pem())),
        server_name: Some("localhost".into()),
        ..Default::default()
    };
    (server, client)
}

async fn run_session(server_tls: Option<&TlsSettings>, client_tls: Option<TlsSettings>) {
    let listener = Listener::bind(0, Some("127.0.0.1"), server_tls).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let collector = spawn_collector(listener);

    let options = SenderOptions {
        tls: client_tls,
        ..Default::default()
    };
    let sender = FrameSender::connect("127.0.0.1", port, options).await.unwrap();
    let mut expected = Vec::new();
    for i in 0..4u8 {
        let frame = patterned(&sender, 0x100, i);
        expected.push(frame.pixels.clone());
        sender.send_frame(frame).await.unwrap();
    }
    let stats = sender.close().await.unwrap();
    assert_eq!(stats.frames, 4);

    let frames = tokio::time::timeout(TIMEOUT, collector)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    let received: Vec<_> = frames.iter().map(|f| f.pixels.clone()).collect();
    assert_eq!(received, expected);
    assert_eq!(
        frames.iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
}

// ── Sessions ─────────────────────────────────────────────────────

#[tokio::test]
async fn plain_session_delivers_frames_in_order() {
    run_session(None, None).await;
}

#[tokio::test]
async fn tls_sessions_release_process_state() {
    // Self-signed server, client without a CA.
    run_session(Some(&TlsSettings::default()), Some(TlsSettings::default())).await;
    assert_eq!(active_leases(), 0);

    // CA-signed server, client verifying against that CA.
    let (server, client) = ca_and_server_files();
    run_session(Some(&server), Some(client)).await;
    assert_eq!(active_leases(), 0);
}

#[tokio::test]
async fn windows_interleave_but_keep_their_own_order() {
    let listener = Listener::bind(0, Some("127.0.0.1"), None).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let collector = spawn_collector(listener);

    let options = SenderOptions {
        codec: CodecId::Raw,
        ..Default::default()
    };
    let sender = FrameSender::connect("127.0.0.1", port, options).await.unwrap();
    let windows = [7u64, 9, 7, 9, 9, 7, 11];
    for (i, window) in windows.iter().enumerate() {
        sender
            .send_frame(patterned(&sender, *window, i as u8))
            .await
            .unwrap();
    }
    sender.close().await.unwrap();

    let frames = tokio::time::timeout(TIMEOUT, collector)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    assert_eq!(frames.len(), windows.len());
    for window in [7u64, 9, 11] {
        let seqs: Vec<_> = frames
            .iter()
            .filter(|f| f.window_id == window)
            .map(|f| f.sequence)
            .collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "window {window}: {seqs:?}");
    }
}

// ── Failure scenarios ────────────────────────────────────────────

#[tokio::test]
async fn truncated_frame_is_a_session_error() {
    let listener = Listener::bind(0, Some("127.0.0.1"), None).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let collector = spawn_collector(listener);

    let mut frame = Frame::new(64, 64, 4);
    frame.window_id = 0x42;
    frame.sequence = 1;
    let bytes = encode_frame(&frame, CodecId::Zstd).unwrap();

    let mut conn = Connection::connect("127.0.0.1", port, None).await.unwrap();
    conn.send(&bytes[..bytes.len() / 2]).await.unwrap();
    conn.close().await;
    conn.close().await;

    let outcome = tokio::time::timeout(TIMEOUT, collector)
        .await
        .expect("timeout")
        .unwrap();
    assert!(matches!(outcome, Err(SessionError::Truncated { window: 0x42 })));
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = Listener::bind(0, Some("127.0.0.1"), None).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = FrameSender::connect("127.0.0.1", port, SenderOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SessionError::Transport(TransportError::Connection { op: "connect", .. })
    ));
}

#[tokio::test]
async fn vanished_peer_surfaces_on_send_or_close() {
    let listener = Listener::bind(0, Some("127.0.0.1"), None).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = tokio::spawn(async move {
        let conn = listener.accept().await.unwrap();
        drop(conn);
    });

    let options = SenderOptions {
        codec: CodecId::Raw,
        ..Default::default()
    };
    let sender = FrameSender::connect("127.0.0.1", port, options).await.unwrap();
    acceptor.await.unwrap();

    let mut failure = None;
    for i in 0..200u32 {
        let frame = patterned(&sender, 1, i as u8);
        if let Err(e) = sender.send_frame(frame).await {
            failure = Some(e);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let failure = match failure {
        Some(e) => e,
        None => sender.close().await.unwrap_err(),
    };
    assert!(matches!(failure, SessionError::Transport(_)));
    assert!(sender.phase().is_closed());
}
