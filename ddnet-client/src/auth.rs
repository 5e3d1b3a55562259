//! Client side of the challenge-response handshake.

use std::time::Duration;

use ddnet_crypto::KeyPair;
use ddnet_net::Connection;
use ddnet_types::AuthMessage;
use tracing::debug;

use crate::error::ClientError;

/// Prove key possession to the relay on a fresh connection.
///
/// Waits for the relay's challenge, signs it, and waits for the
/// acknowledgement. `timeout` bounds each wait individually.
pub async fn authenticate(
    connection: &dyn Connection,
    keypair: &KeyPair,
    timeout: Duration,
) -> Result<(), ClientError> {
    let challenge = match recv_auth(connection, timeout).await? {
        AuthMessage::Challenge { challenge } => challenge,
        other => {
            return Err(ClientError::AuthFailed {
                reason: format!("expected challenge, got {other:?}"),
            })
        }
    };

    let signature = *keypair.sign(&challenge).as_bytes();
    let response = AuthMessage::ChallengeResponse { signature }.to_bytes()?;
    connection.send(&response).await?;

    match recv_auth(connection, timeout).await? {
        AuthMessage::Authenticated => {
            debug!("relay handshake complete");
            Ok(())
        }
        other => Err(ClientError::AuthFailed {
            reason: format!("expected authenticated, got {other:?}"),
        }),
    }
}

async fn recv_auth(
    connection: &dyn Connection,
    timeout: Duration,
) -> Result<AuthMessage, ClientError> {
    let bytes = tokio::time::timeout(timeout, connection.recv())
        .await
        .map_err(|_| ClientError::AuthTimeout {
            seconds: timeout.as_secs(),
        })??;
    Ok(AuthMessage::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddnet_net::memory::MemoryConnection;

    #[tokio::test]
    async fn completes_handshake_against_honest_server() {
        let keypair = KeyPair::generate();
        let public_key = keypair.public_key();
        let (client_end, server_end) = MemoryConnection::pair();

        let server = tokio::spawn(async move {
            let challenge = [42u8; 32];
            server_end
                .send(&AuthMessage::Challenge { challenge }.to_bytes().unwrap())
                .await
                .unwrap();

            let signature =
                match AuthMessage::from_bytes(&server_end.recv().await.unwrap()).unwrap() {
                    AuthMessage::ChallengeResponse { signature } => signature,
                    other => panic!("expected challenge-response, got {other:?}"),
                };
            ddnet_crypto::verify(
                &public_key,
                &challenge,
                &ddnet_types::SignatureBytes::new(signature),
            )
            .unwrap();

            server_end
                .send(&AuthMessage::Authenticated.to_bytes().unwrap())
                .await
                .unwrap();
        });

        authenticate(&client_end, &keypair, Duration::from_secs(5))
            .await
            .unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let keypair = KeyPair::generate();
        let (client_end, _server_end) = MemoryConnection::pair();

        let result = authenticate(&client_end, &keypair, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ClientError::AuthTimeout { .. })));
    }

    #[tokio::test]
    async fn refusal_surfaces_as_auth_failure() {
        let keypair = KeyPair::generate();
        let (client_end, server_end) = MemoryConnection::pair();

        let server = tokio::spawn(async move {
            server_end
                .send(
                    &AuthMessage::Challenge {
                        challenge: [1u8; 32],
                    }
                    .to_bytes()
                    .unwrap(),
                )
                .await
                .unwrap();
            let _ = server_end.recv().await.unwrap();
            // Hang up instead of acknowledging
            server_end.close().await.unwrap();
        });

        let result = authenticate(&client_end, &keypair, Duration::from_secs(5)).await;
        assert!(result.is_err());
        server.await.unwrap();
    }
}
