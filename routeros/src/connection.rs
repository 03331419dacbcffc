// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A single API session

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::codec::SentenceCodec;
use crate::error::RouterError;
use crate::sentence::{Attributes, Command, Reply, Sentence};

#[allow(unused)]
use tracing::{debug, trace, warn};

/// An API session over some byte stream. Commands are run one at a time:
/// a command is sent and all of its replies are read before the next one is sent.
pub struct Connection<T> {
    framed: Framed<T, SentenceCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    pub fn new(stream: T) -> Self {
        Self {
            framed: Framed::new(stream, SentenceCodec),
        }
    }

    async fn next_reply(&mut self) -> Result<Reply, RouterError> {
        match self.framed.next().await {
            Some(Ok(sentence)) => Ok(Reply::try_from(sentence)?),
            Some(Err(e)) => Err(e.into()),
            None => Err(RouterError::Closed),
        }
    }

    /// Run `command` and return the attributes of the items (`!re` replies) it produced.
    ///
    /// # Errors
    /// Fails if the command is rejected by the router (`!trap`), the router closes the session,
    /// or the connection breaks.
    pub async fn run(&mut self, command: &Command) -> Result<Vec<Attributes>, RouterError> {
        self.run_reply(command).await.map(|(items, _)| items)
    }

    /// Like [`Connection::run`] but also returns the attributes of the final `!done` reply.
    async fn run_reply(
        &mut self,
        command: &Command,
    ) -> Result<(Vec<Attributes>, Attributes), RouterError> {
        trace!("Sending: {command}");
        self.framed.send(Sentence::from(command)).await?;

        let mut items = Vec::new();
        let mut trap: Option<String> = None;
        loop {
            match self.next_reply().await? {
                Reply::Re(attrs) => items.push(attrs),
                Reply::Empty => {}
                Reply::Trap(attrs) => {
                    // the router still sends !done after a !trap
                    let message = attrs
                        .get("message")
                        .cloned()
                        .unwrap_or_else(|| "unknown error".to_string());
                    trap.get_or_insert(message);
                }
                Reply::Fatal(reason) => return Err(RouterError::Fatal(reason)),
                Reply::Done(attrs) => {
                    return match trap {
                        Some(message) => Err(RouterError::Trap {
                            command: command.path().to_string(),
                            message,
                        }),
                        None => Ok((items, attrs)),
                    };
                }
            }
        }
    }

    /// Authenticate the session
    ///
    /// # Errors
    /// Fails with [`RouterError::Login`] if the credentials are rejected or the router only
    /// supports the legacy challenge-response login (`RouterOS` older than 6.43).
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), RouterError> {
        let command = Command::new("/login")
            .attribute("name", username)
            .attribute("password", password);
        match self.run_reply(&command).await {
            Ok((_, done)) if done.contains_key("ret") => Err(RouterError::Login(
                "router requires the legacy challenge-response login".to_string(),
            )),
            Ok(_) => Ok(()),
            Err(RouterError::Trap { message, .. }) => Err(RouterError::Login(message)),
            Err(e) => Err(e),
        }
    }

    /// End the session. The router acknowledges `/quit` with `!fatal` and closes the connection.
    pub async fn close(mut self) {
        if let Err(e) = self.framed.send(Sentence::from(&Command::new("/quit"))).await {
            debug!("Failed to send /quit: {e}");
            return;
        }
        match self.next_reply().await {
            Ok(Reply::Fatal(reason)) => debug!("Session closed: {reason}"),
            Ok(reply) => warn!("Unexpected reply to /quit: {reply:?}"),
            Err(e) => debug!("Session closed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SentenceCodec;
    use pretty_assertions::assert_eq;
    use tokio::io::DuplexStream;
    use tracing_test::traced_test;

    type RouterSide = Framed<DuplexStream, SentenceCodec>;

    fn pair() -> (Connection<DuplexStream>, RouterSide) {
        let (client, router) = tokio::io::duplex(4096);
        (Connection::new(client), Framed::new(router, SentenceCodec))
    }

    async fn reply(router: &mut RouterSide, words: &[&str]) {
        let sentence: Sentence = words.iter().copied().collect();
        router.send(sentence).await.unwrap();
    }

    async fn expect(router: &mut RouterSide) -> Vec<String> {
        router.next().await.unwrap().unwrap().words().to_vec()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_run_collects_items() {
        let (mut conn, mut router) = pair();
        let fake = tokio::spawn(async move {
            let words = expect(&mut router).await;
            assert_eq!(words[0], "/ip/firewall/nat/print");
            reply(&mut router, &["!re", "=.id=*1", "=dst-port=80"]).await;
            reply(&mut router, &["!re", "=.id=*2", "=dst-port=443"]).await;
            reply(&mut router, &["!done"]).await;
        });
        let items = conn
            .run(&Command::new("/ip/firewall/nat/print"))
            .await
            .unwrap();
        fake.await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get(".id").unwrap(), "*1");
        assert_eq!(items[1].get("dst-port").unwrap(), "443");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_trap_is_reported_after_done() {
        let (mut conn, mut router) = pair();
        let fake = tokio::spawn(async move {
            expect(&mut router).await;
            reply(&mut router, &["!trap", "=message=no such item"]).await;
            reply(&mut router, &["!done"]).await;
            // the session is still usable afterwards
            expect(&mut router).await;
            reply(&mut router, &["!done", "=ret=*5"]).await;
        });
        let err = conn
            .run(&Command::new("/ip/firewall/nat/remove").attribute(".id", "*9"))
            .await
            .unwrap_err();
        match err {
            RouterError::Trap { command, message } => {
                assert_eq!(command, "/ip/firewall/nat/remove");
                assert_eq!(message, "no such item");
            }
            e => panic!("unexpected error {e}"),
        }
        let items = conn
            .run(&Command::new("/ip/firewall/nat/add"))
            .await
            .unwrap();
        assert!(items.is_empty());
        fake.await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_login() {
        let (mut conn, mut router) = pair();
        let fake = tokio::spawn(async move {
            let words = expect(&mut router).await;
            assert_eq!(words, vec!["/login", "=name=admin", "=password=pw"]);
            reply(&mut router, &["!done"]).await;
            expect(&mut router).await;
            reply(&mut router, &["!trap", "=message=invalid user name or password (6)"]).await;
            reply(&mut router, &["!done"]).await;
            expect(&mut router).await;
            reply(&mut router, &["!done", "=ret=93b438ec9b80057c06dd9fe67d56aa9a"]).await;
        });
        conn.login("admin", "pw").await.unwrap();
        assert!(matches!(
            conn.login("admin", "wrong").await,
            Err(RouterError::Login(_))
        ));
        assert!(matches!(
            conn.login("admin", "pw").await,
            Err(RouterError::Login(_))
        ));
        fake.await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fatal_and_closed() {
        let (mut conn, mut router) = pair();
        let fake = tokio::spawn(async move {
            expect(&mut router).await;
            reply(&mut router, &["!fatal", "not logged in"]).await;
            drop(router);
        });
        let err = conn
            .run(&Command::new("/ip/firewall/nat/print"))
            .await
            .unwrap_err();
        assert!(matches!(&err, RouterError::Fatal(reason) if reason == "not logged in"));
        assert!(err.breaks_connection());
        fake.await.unwrap();

        let err = conn
            .run(&Command::new("/ip/firewall/nat/print"))
            .await
            .unwrap_err();
        assert!(err.breaks_connection());
    }
}
