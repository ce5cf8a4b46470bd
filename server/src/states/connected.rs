use super::{ClientState, InGame, Services};
use crate::accounts::{hash_password, validate_username, verify_password, AccountError};
use crate::connection::Connection;
use blobfield_shared::protocol::{GuestLoginRequestMsg, LoginRequestMsg, Msg, RegisterRequestMsg};

const LOGIN_FAILED: &str = "Invalid username or password";
const REGISTER_FAILED: &str = "Error registering user (internal server error) - please try again later";

/// Initial state: the client has an id but no place in the world.
pub struct Connected {
    services: Services,
    client_id: u64,
}

impl Connected {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            client_id: 0,
        }
    }

    pub(super) fn set_client(&mut self, conn: &Connection) {
        self.client_id = conn.id();
    }

    pub(super) fn on_enter(&mut self, conn: &Connection) {
        conn.socket_send(Msg::id(conn.id()));
    }

    pub(super) async fn handle_message(
        &mut self,
        conn: &Connection,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        if sender_id != conn.id() {
            // World traffic from peers means nothing before login
            tracing::debug!(
                "Client {} [Connected]: ignoring {} from {}",
                self.client_id,
                msg.kind(),
                sender_id
            );
            return None;
        }

        match msg {
            Msg::LoginRequest(request) => self.handle_login(conn, request).await,
            Msg::GuestLoginRequest(request) => self.handle_guest_login(conn, request),
            Msg::RegisterRequest(request) => {
                self.handle_register(conn, request).await;
                None
            }
            other => {
                tracing::warn!(
                    "Client {} [Connected]: unexpected {} message",
                    self.client_id,
                    other.kind()
                );
                None
            }
        }
    }

    fn handle_guest_login(
        &mut self,
        conn: &Connection,
        request: GuestLoginRequestMsg,
    ) -> Option<ClientState> {
        tracing::info!(
            "Client {} [Connected]: guest login as {}",
            self.client_id,
            request.username
        );
        conn.socket_send(Msg::OkResponse);
        Some(self.enter_game(request.username))
    }

    async fn handle_login(
        &mut self,
        conn: &Connection,
        request: LoginRequestMsg,
    ) -> Option<ClientState> {
        let accounts = self.services.accounts.clone();
        let username = request.username.clone();
        let password = request.password;

        let verified = tokio::task::spawn_blocking(move || {
            accounts
                .get_user_by_name(&username)
                .map(|hash| hash.is_some_and(|hash| verify_password(&password, &hash)))
        })
        .await;

        match verified {
            Ok(Ok(true)) => {
                tracing::info!("Client {} [Connected]: user {} logged in", self.client_id, request.username);
                conn.socket_send(Msg::OkResponse);
                Some(self.enter_game(request.username))
            }
            Ok(Ok(false)) => {
                tracing::info!(
                    "Client {} [Connected]: bad credentials for {}",
                    self.client_id,
                    request.username
                );
                conn.socket_send(Msg::deny(LOGIN_FAILED));
                None
            }
            Ok(Err(e)) => {
                tracing::warn!("Client {} [Connected]: error looking up user: {}", self.client_id, e);
                conn.socket_send(Msg::deny(LOGIN_FAILED));
                None
            }
            Err(e) => {
                tracing::error!("Client {} [Connected]: login task failed: {}", self.client_id, e);
                conn.socket_send(Msg::deny(LOGIN_FAILED));
                None
            }
        }
    }

    async fn handle_register(&mut self, conn: &Connection, request: RegisterRequestMsg) {
        if let Err(reason) = validate_username(&request.username) {
            let reason = format!("Invalid username: {}", reason);
            tracing::info!("Client {} [Connected]: {}", self.client_id, reason);
            conn.socket_send(Msg::deny(reason));
            return;
        }

        let accounts = self.services.accounts.clone();
        let cost = self.services.config.bcrypt_cost;
        let username = request.username.clone();
        let password = request.password;

        let created = tokio::task::spawn_blocking(move || {
            if accounts.get_user_by_name(&username)?.is_some() {
                return Err(AccountError::AlreadyExists);
            }
            let hash = hash_password(&password, cost)?;
            accounts.create_user(&username, &hash)
        })
        .await;

        match created {
            Ok(Ok(())) => {
                tracing::info!(
                    "Client {} [Connected]: user {} registered",
                    self.client_id,
                    request.username
                );
                conn.socket_send(Msg::OkResponse);
            }
            Ok(Err(AccountError::AlreadyExists)) => {
                tracing::info!(
                    "Client {} [Connected]: user already exists: {}",
                    self.client_id,
                    request.username
                );
                conn.socket_send(Msg::deny("User already exists"));
            }
            Ok(Err(e)) => {
                tracing::error!(
                    "Client {} [Connected]: failed to register {}: {}",
                    self.client_id,
                    request.username,
                    e
                );
                conn.socket_send(Msg::deny(REGISTER_FAILED));
            }
            Err(e) => {
                tracing::error!("Client {} [Connected]: register task failed: {}", self.client_id, e);
                conn.socket_send(Msg::deny(REGISTER_FAILED));
            }
        }
    }

    fn enter_game(&self, name: String) -> ClientState {
        ClientState::InGame(InGame::new(name, self.services.clone()))
    }
}

#[cfg(test)]
mod tests {
    use crate::states::test_support::Harness;
    use blobfield_shared::protocol::{LoginRequestMsg, Msg, RegisterRequestMsg};

    fn register(name: &str, password: &str) -> Msg {
        Msg::RegisterRequest(RegisterRequestMsg {
            username: name.to_string(),
            password: password.to_string(),
        })
    }

    fn login(name: &str, password: &str) -> Msg {
        Msg::LoginRequest(LoginRequestMsg {
            username: name.to_string(),
            password: password.to_string(),
        })
    }

    async fn expect_deny(h: &mut Harness) -> String {
        match h.next_outbound().await.msg {
            Msg::DenyResponse(d) => d.reason,
            other => panic!("Expected DenyResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn guest_login_enters_game_with_start_radius() {
        let mut h = Harness::new().await;
        h.send(Msg::GuestLoginRequest(
            blobfield_shared::protocol::GuestLoginRequestMsg {
                username: "alice".to_string(),
            },
        ))
        .await;

        assert!(matches!(h.next_outbound().await.msg, Msg::OkResponse));
        match h.next_outbound().await.msg {
            Msg::Player(p) => {
                assert_eq!(p.id, h.id());
                assert_eq!(p.name, "alice");
                assert_eq!(p.radius, 20.0);
            }
            other => panic!("Expected Player, got {:?}", other),
        }
        assert_eq!(h.client.state_name(), "InGame");
        assert!(h.services.world.players.get(h.id()).is_some());
    }

    #[tokio::test]
    async fn register_validates_names() {
        let mut h = Harness::new().await;

        h.send(register("ab", "pw")).await;
        assert!(expect_deny(&mut h).await.starts_with("Invalid username"));

        h.send(register("abc ", "pw")).await;
        assert!(expect_deny(&mut h).await.contains("whitespace"));

        h.send(register("abc", "pw")).await;
        assert!(matches!(h.next_outbound().await.msg, Msg::OkResponse));

        h.send(register("ABC", "other")).await;
        assert_eq!(expect_deny(&mut h).await, "User already exists");

        // Registration alone does not log in
        assert_eq!(h.client.state_name(), "Connected");
    }

    #[tokio::test]
    async fn login_failures_share_one_reason() {
        let mut h = Harness::new().await;
        h.send(register("dave", "secret")).await;
        assert!(matches!(h.next_outbound().await.msg, Msg::OkResponse));

        h.send(login("nobody", "secret")).await;
        let missing_user = expect_deny(&mut h).await;
        h.send(login("dave", "wrong")).await;
        let bad_password = expect_deny(&mut h).await;

        assert_eq!(missing_user, bad_password);
        assert_eq!(h.client.state_name(), "Connected");
    }

    #[tokio::test]
    async fn registered_user_can_log_in() {
        let mut h = Harness::new().await;
        h.send(register("Erin", "secret")).await;
        assert!(matches!(h.next_outbound().await.msg, Msg::OkResponse));

        h.send(login("erin", "secret")).await;
        assert!(matches!(h.next_outbound().await.msg, Msg::OkResponse));
        match h.next_outbound().await.msg {
            Msg::Player(p) => assert_eq!(p.name, "erin"),
            other => panic!("Expected Player, got {:?}", other),
        }
        assert_eq!(h.client.state_name(), "InGame");
    }

    #[tokio::test]
    async fn requests_from_peers_and_world_traffic_are_ignored() {
        let mut h = Harness::new().await;
        let peer = h.observer_id;
        h.client
            .process_message(
                peer,
                Msg::GuestLoginRequest(blobfield_shared::protocol::GuestLoginRequestMsg {
                    username: "mallory".to_string(),
                }),
            )
            .await;
        h.client.process_message(peer, Msg::chat("hi")).await;
        h.send(Msg::spore_consumed(1)).await;

        assert!(h.quiet().await);
        assert_eq!(h.client.state_name(), "Connected");
    }
}
