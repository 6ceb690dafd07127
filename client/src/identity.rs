use url::Url;
use uuid::Uuid;

use crate::utils::generate_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Joiner,
    None,
}

/// Who this session is and which room it belongs to.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    client_id: String,
    role: Role,
    room_id: Option<String>,
    key: Option<String>,
    media_url: Option<Url>,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

impl SessionIdentity {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            role: Role::None,
            room_id: None,
            key: None,
            media_url: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_creator(&self) -> bool {
        self.role == Role::Creator
    }

    pub fn is_in_room(&self) -> bool {
        self.room_id.is_some()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn media_url(&self) -> Option<&Url> {
        self.media_url.as_ref()
    }

    /// Takes the creator role and generates a fresh shared key.
    pub fn create_room(&mut self, room_id: String, media_url: Url) {
        self.role = Role::Creator;
        self.room_id = Some(room_id);
        self.key = Some(generate_key());
        self.media_url = Some(media_url);
    }

    pub fn join_room(&mut self, room_id: String, key: String, media_url: Url) {
        self.role = Role::Joiner;
        self.room_id = Some(room_id);
        self.key = Some(key);
        self.media_url = Some(media_url);
    }

    pub fn exit_room(&mut self) {
        self.role = Role::None;
        self.room_id = None;
        self.key = None;
        self.media_url = None;
    }

    /// `<http_server>/join/<room>#<key>`; the key rides in the fragment so it
    /// is never sent to the relay.
    pub fn invite_url(&self, http_server: &Url) -> Option<Url> {
        let (room_id, key) = (self.room_id.as_deref()?, self.key.as_deref()?);
        let mut url = http_server
            .join(&format!("join/{}", urlencoding::encode(room_id)))
            .ok()?;
        url.set_fragment(Some(key));
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media() -> Url {
        Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap()
    }

    #[test]
    fn starts_outside_any_room() {
        let identity = SessionIdentity::default();
        assert_eq!(identity.role(), Role::None);
        assert!(!identity.is_in_room());
        assert!(!identity.client_id().is_empty());
    }

    #[test]
    fn create_then_exit_clears_everything() {
        let mut identity = SessionIdentity::new("me");
        identity.create_room("abc123".into(), media());
        assert!(identity.is_creator());
        assert!(identity.is_in_room());
        assert_eq!(identity.key().map(str::len), Some(12));

        identity.exit_room();
        assert_eq!(identity.role(), Role::None);
        assert!(identity.room_id().is_none());
        assert!(identity.key().is_none());
        assert!(identity.media_url().is_none());
        assert_eq!(identity.client_id(), "me");
    }

    #[test]
    fn joiner_keeps_provided_key() {
        let mut identity = SessionIdentity::new("me");
        identity.join_room("abc123".into(), "sharedsecret".into(), media());
        assert_eq!(identity.role(), Role::Joiner);
        assert!(!identity.is_creator());
        assert_eq!(identity.key(), Some("sharedsecret"));
    }

    #[test]
    fn invite_url_puts_key_in_fragment() {
        let mut identity = SessionIdentity::new("me");
        let server = Url::parse("https://relay.example.com/").unwrap();
        assert!(identity.invite_url(&server).is_none());

        identity.join_room("abc123".into(), "k3y".into(), media());
        let invite = identity.invite_url(&server).unwrap();
        assert_eq!(invite.as_str(), "https://relay.example.com/join/abc123#k3y");
    }
}
