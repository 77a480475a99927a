use battleship_sessions::{Message, TcpTransport, Transport, PROTOCOL_VERSION};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;

async fn pair() -> anyhow::Result<(TcpTransport, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let client = TcpStream::connect(addr).await?;
    let (server, _) = listener.accept().await?;
    Ok((TcpTransport::new(server), client))
}

fn frame(msg: &Message) -> Vec<u8> {
    let data = bincode::serialize(msg).unwrap();
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&data);
    out
}

#[tokio::test]
async fn messages_roundtrip_over_tcp() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut t = TcpTransport::new(stream);
        let msg = t.recv().await.unwrap();
        t.send(msg).await.unwrap();
    });

    let mut client = TcpTransport::connect(addr).await?;
    let hello = Message::Hello {
        version: PROTOCOL_VERSION,
        token: "alice".into(),
    };
    client.send(hello.clone()).await?;
    assert_eq!(client.recv().await?, hello);
    server.await?;
    Ok(())
}

#[tokio::test]
async fn frames_split_and_coalesced() -> anyhow::Result<()> {
    let (mut server, mut client) = pair().await?;
    let mut bytes = frame(&Message::Ping);
    bytes.extend(frame(&Message::ListSessions));
    bytes.extend(frame(&Message::Leave));

    // Dribble the first bytes, then send the rest in one write.
    let (head, tail) = bytes.split_at(3);
    for b in head {
        client.write_all(&[*b]).await?;
        client.flush().await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    client.write_all(tail).await?;

    assert_eq!(server.recv().await?, Message::Ping);
    assert_eq!(server.recv().await?, Message::ListSessions);
    assert_eq!(server.recv().await?, Message::Leave);
    Ok(())
}

#[tokio::test]
async fn recv_is_cancel_safe() -> anyhow::Result<()> {
    let (mut server, mut client) = pair().await?;
    let bytes = frame(&Message::Pong);
    client.write_all(&bytes[..2]).await?;

    // Give up on a half-read frame, then finish it.
    let timed_out = tokio::time::timeout(Duration::from_millis(50), server.recv()).await;
    assert!(timed_out.is_err());
    client.write_all(&bytes[2..]).await?;
    assert_eq!(server.recv().await?, Message::Pong);
    Ok(())
}

#[tokio::test]
async fn oversized_frame_is_refused() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let mut client = TcpStream::connect(listener.local_addr()?).await?;
    let (accepted, _) = listener.accept().await?;
    let mut server = TcpTransport::with_config(accepted, Duration::from_secs(1), 64);

    client.write_all(&1_000u32.to_be_bytes()).await?;
    let err = server.recv().await.unwrap_err();
    assert!(err.to_string().contains("too large"), "{}", err);

    let mut sender = TcpTransport::with_config(client, Duration::from_secs(1), 8);
    let err = sender
        .send(Message::Error("this will not fit in eight bytes".into()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("too large"), "{}", err);
    Ok(())
}

#[tokio::test]
async fn zero_length_and_garbage_frames_are_errors() -> anyhow::Result<()> {
    let (mut server, mut client) = pair().await?;
    client.write_all(&0u32.to_be_bytes()).await?;
    assert!(server.recv().await.is_err());

    let (mut server, mut client) = pair().await?;
    client.write_all(&4u32.to_be_bytes()).await?;
    client.write_all(&[0xff, 0xff, 0xff, 0xff]).await?;
    let err = server.recv().await.unwrap_err();
    assert!(err.to_string().contains("Deserialization"), "{}", err);
    Ok(())
}

#[tokio::test]
async fn peer_close_ends_recv() -> anyhow::Result<()> {
    let (mut server, client) = pair().await?;
    drop(client);
    let err = server.recv().await.unwrap_err();
    assert!(err.to_string().contains("closed"), "{}", err);
    Ok(())
}
