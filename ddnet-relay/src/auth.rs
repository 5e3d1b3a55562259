//! Server side of the challenge-response handshake.

use std::time::Duration;

use ddnet_net::Connection;
use ddnet_types::{AuthMessage, ClientIdentity, SignatureBytes};
use tracing::{debug, warn};

use crate::error::ProtocolError;

/// Run the handshake on a freshly accepted connection.
///
/// Sends a random 32-byte challenge and waits (bounded by `timeout`) for a
/// signature that verifies against the public key the client asserted at
/// connection time. On success the client is told it is authenticated;
/// every failure is terminal for the connection.
pub async fn authenticate(
    connection: &dyn Connection,
    identity: &ClientIdentity,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let mut challenge = [0u8; 32];
    getrandom::getrandom(&mut challenge).map_err(|e| ProtocolError::AuthFailed {
        reason: format!("challenge generation failed: {e}"),
    })?;

    let message =
        AuthMessage::Challenge { challenge }
            .to_bytes()
            .map_err(|e| ProtocolError::InvalidMessage {
                reason: e.to_string(),
            })?;
    connection.send(&message).await?;
    debug!(client = %identity.public_key, "challenge sent");

    let response = tokio::time::timeout(timeout, connection.recv())
        .await
        .map_err(|_| ProtocolError::AuthTimeout {
            seconds: timeout.as_secs(),
        })??;

    let signature = match AuthMessage::from_bytes(&response) {
        Ok(AuthMessage::ChallengeResponse { signature }) => SignatureBytes::new(signature),
        Ok(other) => {
            return Err(ProtocolError::AuthFailed {
                reason: format!("expected challenge-response, got {other:?}"),
            })
        }
        Err(e) => {
            return Err(ProtocolError::InvalidMessage {
                reason: e.to_string(),
            })
        }
    };

    if let Err(e) = ddnet_crypto::verify(&identity.public_key, &challenge, &signature) {
        warn!(client = %identity.public_key, "challenge signature rejected");
        return Err(ProtocolError::AuthFailed {
            reason: e.to_string(),
        });
    }

    let authenticated =
        AuthMessage::Authenticated
            .to_bytes()
            .map_err(|e| ProtocolError::InvalidMessage {
                reason: e.to_string(),
            })?;
    connection.send(&authenticated).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddnet_crypto::KeyPair;
    use ddnet_net::memory::MemoryConnection;
    use ddnet_types::ClientId;

    fn identity_for(keypair: &KeyPair) -> ClientIdentity {
        ClientIdentity {
            public_key: keypair.public_key(),
            client_id: ClientId::random(),
        }
    }

    async fn client_answers(connection: MemoryConnection, keypair: KeyPair) -> MemoryConnection {
        let challenge = match AuthMessage::from_bytes(&connection.recv().await.unwrap()).unwrap() {
            AuthMessage::Challenge { challenge } => challenge,
            other => panic!("expected challenge, got {other:?}"),
        };
        let signature = *keypair.sign(&challenge).as_bytes();
        connection
            .send(
                &AuthMessage::ChallengeResponse { signature }
                    .to_bytes()
                    .unwrap(),
            )
            .await
            .unwrap();
        connection
    }

    #[tokio::test]
    async fn valid_signature_authenticates() {
        let keypair = KeyPair::generate();
        let identity = identity_for(&keypair);
        let (server_end, client_end) = MemoryConnection::pair();

        let client = tokio::spawn(async move {
            // Keep our end open until the server's confirmation arrives.
            let connection = client_answers(client_end, keypair).await;
            match AuthMessage::from_bytes(&connection.recv().await.unwrap()).unwrap() {
                AuthMessage::Authenticated => {}
                other => panic!("expected authenticated, got {other:?}"),
            }
        });

        authenticate(&server_end, &identity, Duration::from_secs(10))
            .await
            .unwrap();
        client.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let keypair = KeyPair::generate();
        // Server believes the client is someone else
        let identity = identity_for(&KeyPair::generate());
        let (server_end, client_end) = MemoryConnection::pair();

        let client = tokio::spawn(async move {
            client_answers(client_end, keypair).await;
        });

        let result = authenticate(&server_end, &identity, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(ProtocolError::AuthFailed { .. })));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let keypair = KeyPair::generate();
        let identity = identity_for(&keypair);
        let (server_end, _client_end) = MemoryConnection::pair();

        let result = authenticate(&server_end, &identity, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ProtocolError::AuthTimeout { .. })));
    }

    #[tokio::test]
    async fn unexpected_message_fails_handshake() {
        let keypair = KeyPair::generate();
        let identity = identity_for(&keypair);
        let (server_end, client_end) = MemoryConnection::pair();

        let client = tokio::spawn(async move {
            // Drain the challenge, then reply with the wrong message type
            let _ = client_end.recv().await.unwrap();
            client_end
                .send(&AuthMessage::Authenticated.to_bytes().unwrap())
                .await
                .unwrap();
        });

        let result = authenticate(&server_end, &identity, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(ProtocolError::AuthFailed { .. })));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn garbage_response_is_invalid_message() {
        let keypair = KeyPair::generate();
        let identity = identity_for(&keypair);
        let (server_end, client_end) = MemoryConnection::pair();

        let client = tokio::spawn(async move {
            let _ = client_end.recv().await.unwrap();
            client_end.send(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();
        });

        let result = authenticate(&server_end, &identity, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(ProtocolError::InvalidMessage { .. })));
        client.await.unwrap();
    }
}
