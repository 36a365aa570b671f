use anyhow::Result;
use common::{PlayerScore, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream as TokioTcpStream;
use tokio::time::Duration;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// Test client wrapper for easier testing
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TokioTcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        Ok(TestClient { ws: ws_stream })
    }

    /// Connect and consume the leaderboard every new connection is sent first.
    pub async fn connect_and_sync(url: &str) -> Result<(Self, u64, Vec<PlayerScore>)> {
        let mut client = Self::connect(url).await?;
        let (version, data) = client.expect_leaderboard().await?;
        Ok((client, version, data))
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    pub async fn submit_score(&mut self, player_id: &str, player_name: &str, score: i64) -> Result<()> {
        let msg = json!({
            "action": "submit_score",
            "player_id": player_id,
            "player_name": player_name,
            "score": score,
        });
        self.send_text(&msg.to_string()).await
    }

    pub async fn update_score(&mut self, player_id: &str, points: i64) -> Result<()> {
        let msg = json!({ "type": "update_score", "user_id": player_id, "points": points });
        self.send_text(&msg.to_string()).await
    }

    pub async fn request_leaderboard(&mut self) -> Result<()> {
        self.send_text(r#"{"action":"get_leaderboard"}"#).await
    }

    pub async fn receive_message(&mut self) -> Result<ServerMessage> {
        let timeout = tokio::time::timeout(Duration::from_secs(5), self.ws.next()).await;
        match timeout {
            Ok(Some(msg)) => match msg? {
                Message::Text(text) => Ok(serde_json::from_str(&text)?),
                other => Err(anyhow::anyhow!("Unexpected message type: {:?}", other)),
            },
            Ok(None) => Err(anyhow::anyhow!("Connection closed")),
            Err(_) => Err(anyhow::anyhow!("Timeout waiting for message")),
        }
    }

    pub async fn expect_leaderboard(&mut self) -> Result<(u64, Vec<PlayerScore>)> {
        match self.receive_message().await? {
            ServerMessage::LeaderboardUpdate { version, data, .. } => Ok((version, data)),
            other => Err(anyhow::anyhow!("Expected leaderboard_update, got {:?}", other)),
        }
    }

    /// Read leaderboard updates until one satisfies `done`.
    pub async fn wait_for_leaderboard<F>(&mut self, mut done: F) -> Result<(u64, Vec<PlayerScore>)>
    where
        F: FnMut(&[PlayerScore]) -> bool,
    {
        loop {
            let (version, data) = self.expect_leaderboard().await?;
            if done(&data) {
                return Ok((version, data));
            }
        }
    }

    /// Ok(None) if nothing arrives within `wait`.
    pub async fn try_receive(&mut self, wait: Duration) -> Result<Option<ServerMessage>> {
        match tokio::time::timeout(wait, self.ws.next()).await {
            Ok(Some(msg)) => match msg? {
                Message::Text(text) => Ok(Some(serde_json::from_str(&text)?)),
                _ => Ok(None),
            },
            Ok(None) => Err(anyhow::anyhow!("Connection closed")),
            Err(_) => Ok(None),
        }
    }

    pub async fn disconnect(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
