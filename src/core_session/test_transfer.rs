// Lock-step exchanges between a TransferSession and a scripted client over loopback

#[cfg(test)]
mod tests {
    use crate::core_session::*;
    use crate::core_storage::memory::MemoryStorage;
    use crate::core_storage::Storage;
    use crate::core_tftp::packet::{encode_ack, encode_data, encode_error};
    use crate::core_tftp::{Packet, TftpError, TransferMode};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;

    struct Harness {
        client: UdpSocket,
        session_addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        session_id: u16,
        shutdown: broadcast::Sender<()>,
        handle: JoinHandle<Result<SessionOutcome, TftpError>>,
    }

    async fn start(
        direction: Direction,
        file_name: &str,
        storage: Arc<MemoryStorage>,
        settings: SessionSettings,
        port_range: std::ops::RangeInclusive<u16>,
    ) -> Harness {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let session_addr = socket.local_addr().unwrap();
        let peer = client.local_addr().unwrap();

        let registry = Arc::new(SessionRegistry::new(port_range, 64, None));
        let session_id = registry
            .allocate(SessionInfo::new(peer, file_name, direction))
            .unwrap();
        let lease = SessionLease::new(Arc::clone(&registry), session_id);

        let (shutdown, _) = broadcast::channel(1);
        let context = SessionContext {
            storage: storage.clone() as Arc<dyn Storage>,
            settings,
            shutdown: shutdown.subscribe(),
        };
        let request = TransferRequest {
            peer,
            direction,
            file_name: file_name.to_string(),
            mode: TransferMode::Octet,
        };

        let session = match direction {
            Direction::Read => {
                let first = storage.read(file_name, 0, 512).await.unwrap();
                TransferSession::reader(lease, socket, request, first, context)
            }
            Direction::Write => TransferSession::writer(lease, socket, request, context),
        };
        session.transmit().await.unwrap();
        let handle = tokio::spawn(session.run());

        Harness {
            client,
            session_addr,
            registry,
            session_id,
            shutdown,
            handle,
        }
    }

    fn settings(timeout_ms: u64, max_retries: u32) -> SessionSettings {
        SessionSettings {
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
        }
    }

    fn file(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    async fn recv(socket: &UdpSocket) -> (Packet, SocketAddr) {
        let mut buf = [0u8; 1024];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("no packet from the session")
            .unwrap();
        (Packet::decode(&buf[..len]).unwrap(), from)
    }

    async fn expect_silence(socket: &UdpSocket, window: Duration) {
        let mut buf = [0u8; 1024];
        let got = tokio::time::timeout(window, socket.recv_from(&mut buf)).await;
        assert!(got.is_err(), "unexpected packet: {:?}", got);
    }

    async fn finish(
        handle: JoinHandle<Result<SessionOutcome, TftpError>>,
    ) -> Result<SessionOutcome, TftpError> {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session did not close")
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_short_file_closes_after_first_ack() {
        let storage = Arc::new(MemoryStorage::with_file("a.txt", file(300)));
        let h = start(Direction::Read, "a.txt", storage, settings(1000, 5), 40000..=40099).await;

        let (packet, from) = recv(&h.client).await;
        assert_eq!(from, h.session_addr);
        assert_eq!(
            packet,
            Packet::Data {
                block: 1,
                payload: file(300)
            }
        );

        h.client.send_to(&encode_ack(1), h.session_addr).await.unwrap();
        let result = finish(h.handle).await;
        assert_eq!(result.unwrap(), SessionOutcome::Completed(300));
        assert!(!h.registry.contains(h.session_id));
    }

    #[tokio::test]
    async fn test_read_exact_multiple_ends_with_empty_block() {
        let content = file(1024);
        let storage = Arc::new(MemoryStorage::with_file("b.bin", content.clone()));
        let h = start(Direction::Read, "b.bin", storage, settings(1000, 5), 40000..=40099).await;

        let mut received = Vec::new();
        for expected in 1..=3u16 {
            let (packet, _) = recv(&h.client).await;
            match packet {
                Packet::Data { block, payload } => {
                    assert_eq!(block, expected);
                    received.extend_from_slice(&payload);
                    if expected == 3 {
                        assert!(payload.is_empty());
                    } else {
                        assert_eq!(payload.len(), 512);
                    }
                }
                other => panic!("expected DATA, got {:?}", other),
            }
            h.client
                .send_to(&encode_ack(expected), h.session_addr)
                .await
                .unwrap();
        }

        assert_eq!(received, content);
        let result = finish(h.handle).await;
        assert_eq!(result.unwrap(), SessionOutcome::Completed(1024));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_write_two_blocks() {
        let storage = Arc::new(MemoryStorage::default());
        let h = start(
            Direction::Write,
            "b.txt",
            Arc::clone(&storage),
            settings(1000, 5),
            40000..=40099,
        )
        .await;

        assert_eq!(recv(&h.client).await.0, Packet::Ack { block: 0 });

        h.client
            .send_to(&encode_data(1, &[7; 512]), h.session_addr)
            .await
            .unwrap();
        assert_eq!(recv(&h.client).await.0, Packet::Ack { block: 1 });

        h.client
            .send_to(&encode_data(2, &[9; 100]), h.session_addr)
            .await
            .unwrap();
        assert_eq!(recv(&h.client).await.0, Packet::Ack { block: 2 });

        let result = finish(h.handle).await;
        assert_eq!(result.unwrap(), SessionOutcome::Completed(612));
        assert!(h.registry.is_empty());

        let written = storage.contents("b.txt").unwrap();
        assert_eq!(written.len(), 612);
        assert!(written[..512].iter().all(|&b| b == 7));
        assert!(written[512..].iter().all(|&b| b == 9));
    }

    #[tokio::test]
    async fn test_silent_peer_exhausts_retries_and_frees_id() {
        let storage = Arc::new(MemoryStorage::with_file("a.txt", file(300)));
        let h = start(Direction::Read, "a.txt", storage, settings(40, 5), 40000..=40000).await;

        // The opening DATA(1) plus five identical retransmissions.
        let mut copies = 0;
        for _ in 0..6 {
            let (packet, _) = recv(&h.client).await;
            assert_eq!(
                packet,
                Packet::Data {
                    block: 1,
                    payload: file(300)
                }
            );
            copies += 1;
        }
        assert_eq!(copies, 6);

        let result = finish(h.handle).await;
        assert!(matches!(result, Err(TftpError::TimeoutExhausted(5))));
        assert!(!h.registry.contains(h.session_id));

        // Abandonment is silent.
        expect_silence(&h.client, Duration::from_millis(150)).await;

        // The single id of the range is free again.
        let peer = h.client.local_addr().unwrap();
        let again = h
            .registry
            .allocate(SessionInfo::new(peer, "a.txt", Direction::Read))
            .unwrap();
        assert_eq!(again, h.session_id);
    }

    #[tokio::test]
    async fn test_duplicate_ack_neither_resends_nor_advances() {
        let storage = Arc::new(MemoryStorage::with_file("b.bin", file(1024)));
        let h = start(Direction::Read, "b.bin", storage, settings(1000, 5), 40000..=40099).await;

        assert!(matches!(recv(&h.client).await.0, Packet::Data { block: 1, .. }));
        h.client.send_to(&encode_ack(1), h.session_addr).await.unwrap();
        assert!(matches!(recv(&h.client).await.0, Packet::Data { block: 2, .. }));

        // A late duplicate of ACK(1) is answered with nothing.
        h.client.send_to(&encode_ack(1), h.session_addr).await.unwrap();
        expect_silence(&h.client, Duration::from_millis(150)).await;

        h.client.send_to(&encode_ack(2), h.session_addr).await.unwrap();
        assert_eq!(
            recv(&h.client).await.0,
            Packet::Data {
                block: 3,
                payload: Vec::new()
            }
        );
        h.client.send_to(&encode_ack(3), h.session_addr).await.unwrap();

        let result = finish(h.handle).await;
        assert_eq!(result.unwrap(), SessionOutcome::Completed(1024));
    }

    #[tokio::test]
    async fn test_packets_from_other_peers_are_ignored() {
        let storage = Arc::new(MemoryStorage::with_file("a.txt", file(300)));
        let h = start(Direction::Read, "a.txt", storage, settings(1000, 5), 40000..=40099).await;
        let stray = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        assert!(matches!(recv(&h.client).await.0, Packet::Data { block: 1, .. }));

        // Would complete the transfer if it came from the real peer.
        stray.send_to(&encode_ack(1), h.session_addr).await.unwrap();
        expect_silence(&stray, Duration::from_millis(150)).await;
        assert!(!h.handle.is_finished());

        h.client.send_to(&encode_ack(1), h.session_addr).await.unwrap();
        let result = finish(h.handle).await;
        assert_eq!(result.unwrap(), SessionOutcome::Completed(300));
    }

    #[tokio::test]
    async fn test_duplicate_data_is_not_written_twice() {
        let storage = Arc::new(MemoryStorage::default());
        let h = start(
            Direction::Write,
            "c.bin",
            Arc::clone(&storage),
            settings(1000, 5),
            40000..=40099,
        )
        .await;

        assert_eq!(recv(&h.client).await.0, Packet::Ack { block: 0 });
        h.client
            .send_to(&encode_data(1, &[1; 512]), h.session_addr)
            .await
            .unwrap();
        assert_eq!(recv(&h.client).await.0, Packet::Ack { block: 1 });

        h.client
            .send_to(&encode_data(1, &[1; 512]), h.session_addr)
            .await
            .unwrap();
        expect_silence(&h.client, Duration::from_millis(150)).await;

        h.client
            .send_to(&encode_data(2, &[]), h.session_addr)
            .await
            .unwrap();
        assert_eq!(recv(&h.client).await.0, Packet::Ack { block: 2 });

        let result = finish(h.handle).await;
        assert_eq!(result.unwrap(), SessionOutcome::Completed(512));
        assert_eq!(storage.contents("c.bin").unwrap().len(), 512);
    }

    #[tokio::test]
    async fn test_storage_failure_sends_disk_error() {
        let storage = Arc::new(MemoryStorage::failing_writes());
        let h = start(Direction::Write, "d.bin", storage, settings(1000, 5), 40000..=40099).await;

        assert_eq!(recv(&h.client).await.0, Packet::Ack { block: 0 });
        h.client
            .send_to(&encode_data(1, b"hello"), h.session_addr)
            .await
            .unwrap();
        assert_eq!(
            recv(&h.client).await.0,
            Packet::Error {
                code: 2,
                message: "disk error".into()
            }
        );

        let result = finish(h.handle).await;
        assert!(matches!(result, Err(TftpError::StorageIo(_))));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_peer_error_aborts_session() {
        let storage = Arc::new(MemoryStorage::with_file("b.bin", file(2048)));
        let h = start(Direction::Read, "b.bin", storage, settings(1000, 5), 40000..=40099).await;

        assert!(matches!(recv(&h.client).await.0, Packet::Data { block: 1, .. }));
        h.client
            .send_to(&encode_error(0, "cancelled"), h.session_addr)
            .await
            .unwrap();

        let result = finish(h.handle).await;
        match result {
            Err(TftpError::PeerAborted { code, message }) => {
                assert_eq!(code, 0);
                assert_eq!(message, "cancelled");
            }
            other => panic!("expected PeerAborted, got {:?}", other),
        }
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_count_resets_after_progress() {
        let storage = Arc::new(MemoryStorage::with_file("b.bin", file(1024)));
        let h = start(Direction::Read, "b.bin", storage, settings(200, 2), 40000..=40099).await;

        // Two retransmissions of DATA(1) use up the whole retry budget...
        for _ in 0..3 {
            assert!(matches!(recv(&h.client).await.0, Packet::Data { block: 1, .. }));
        }
        h.client.send_to(&encode_ack(1), h.session_addr).await.unwrap();

        // ...which is granted again once the transfer moves on.
        for _ in 0..3 {
            assert!(matches!(recv(&h.client).await.0, Packet::Data { block: 2, .. }));
        }
        h.client.send_to(&encode_ack(2), h.session_addr).await.unwrap();
        assert!(matches!(recv(&h.client).await.0, Packet::Data { block: 3, .. }));
        h.client.send_to(&encode_ack(3), h.session_addr).await.unwrap();

        let result = finish(h.handle).await;
        assert_eq!(result.unwrap(), SessionOutcome::Completed(1024));
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let storage = Arc::new(MemoryStorage::default());
        let h = start(Direction::Write, "e.bin", storage, settings(1000, 5), 40000..=40099).await;

        assert_eq!(recv(&h.client).await.0, Packet::Ack { block: 0 });
        h.shutdown.send(()).unwrap();

        let result = finish(h.handle).await;
        assert_eq!(result.unwrap(), SessionOutcome::Shutdown);
        assert!(h.registry.is_empty());
    }
}
