use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{DefaultOnNull, serde_as};
use time::OffsetDateTime;
use uuid::Uuid;

/// Stable identifier the auth provider assigns to an identity.
pub type SubjectId = Uuid;
/// Server-assigned identifier of a catalog entry.
pub type GameId = i64;
/// Server-assigned identifier of a comment.
pub type CommentId = i64;
/// Server-assigned identifier of a notification row.
pub type NotificationId = i64;

/// Application role attached to a profile.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular account: may comment and rate.
    #[default]
    User,
    /// May also create, edit and delete games.
    Admin,
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Anything other than an explicit admin marker is a regular user.
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::User,
        })
    }
}

/// Application-level user record, one per auth subject.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Primary key of the profile row.
    pub id: Uuid,
    /// Auth subject the profile belongs to.
    #[serde(rename = "auth_user_id")]
    pub auth_subject_id: SubjectId,
    /// Display name.
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub username: String,
    /// Contact email copied from the identity.
    #[serde(default)]
    pub email: Option<String>,
    /// Permissions of the account.
    #[serde(default)]
    pub role: Role,
    /// Row creation time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    /// Last row update.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    /// Set on profiles synthesised locally because the remote row could not be created.
    #[serde(skip)]
    pub provisional: bool,
}

impl Profile {
    /// In-memory stand-in used until the remote row exists.
    pub fn provisional(subject: SubjectId, username: String, email: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: subject,
            auth_subject_id: subject,
            username,
            email,
            role: Role::User,
            created_at: Some(now),
            updated_at: Some(now),
            provisional: true,
        }
    }

    /// Whether the profile has the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Row inserted when a profile is provisioned.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    /// Auth subject the profile belongs to.
    pub auth_user_id: SubjectId,
    /// Display name.
    pub username: String,
    /// Contact email.
    pub email: Option<String>,
    /// Initial role.
    pub role: Role,
}

/// Download link attached to a game.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    /// Label; may be empty.
    #[serde(default)]
    pub name: String,
    /// Target URL.
    #[serde(default)]
    pub url: String,
}

impl Link {
    /// Link with both fields set.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Label shown to users: the name when present, the URL otherwise.
    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}

impl From<String> for Link {
    /// Upgrade the legacy bare-string shape.
    fn from(url: String) -> Self {
        Self {
            name: String::new(),
            url,
        }
    }
}

impl From<&str> for Link {
    fn from(url: &str) -> Self {
        Link::from(url.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LinkRepr {
    Legacy(String),
    Full(Link),
}

impl From<LinkRepr> for Link {
    fn from(value: LinkRepr) -> Self {
        match value {
            LinkRepr::Legacy(url) => Link::from(url),
            LinkRepr::Full(link) => link,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LinksRepr {
    Many(Vec<LinkRepr>),
    One(LinkRepr),
}

/// Upgrade any accepted links shape to the normalized `[{name, url}]` form.
pub fn normalize_links(value: serde_json::Value) -> Result<Vec<Link>, serde_json::Error> {
    deserialize_links(value)
}

/// Accept `null`, a bare string, a single object or an array mixing both shapes.
fn deserialize_links<'de, D>(deserializer: D) -> Result<Vec<Link>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<LinksRepr>::deserialize(deserializer)?;
    Ok(match raw {
        None => Vec::new(),
        Some(LinksRepr::Many(items)) => items.into_iter().map(Link::from).collect(),
        Some(LinksRepr::One(LinkRepr::Legacy(url))) if url.is_empty() => Vec::new(),
        Some(LinksRepr::One(item)) => vec![Link::from(item)],
    })
}

/// Catalog entry.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    /// Server-assigned id.
    pub id: GameId,
    /// Title.
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub name: String,
    /// Free-text genre.
    #[serde(default)]
    pub genre: Option<String>,
    /// Long description.
    #[serde(default)]
    pub description: Option<String>,
    /// Admin notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Explicit cover image URL.
    #[serde(default)]
    pub image: Option<String>,
    /// Gallery image URLs in display order.
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub images: Vec<String>,
    /// Download links, always in the normalized shape.
    #[serde(default, deserialize_with = "deserialize_links")]
    pub links: Vec<Link>,
    /// Rating stored on the game row.
    #[serde(default)]
    pub rating: Option<f64>,
}

impl Game {
    /// Cover image for cards: explicit image, then first gallery image.
    pub fn cover_image(&self) -> Option<&str> {
        self.image
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.images.first().map(String::as_str))
    }
}

/// Row inserted when an admin creates a game.
#[derive(Debug, Clone, Serialize)]
pub struct NewGame {
    /// Title.
    pub name: String,
    /// Free-text genre.
    pub genre: Option<String>,
    /// Long description.
    pub description: Option<String>,
    /// Admin notes.
    pub notes: Option<String>,
    /// Explicit cover image URL.
    pub image: Option<String>,
    /// Gallery image URLs.
    pub images: Vec<String>,
    /// Normalized download links.
    pub links: Vec<Link>,
}

/// Comment attached to a game; `parent_id` points at the comment it replies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    /// Server-assigned id.
    pub id: CommentId,
    /// Game commented on.
    pub game_id: GameId,
    /// Author subject.
    #[serde(rename = "auth_user_id")]
    pub auth_subject_id: SubjectId,
    /// Comment text.
    pub content: String,
    /// Comment replied to, if any.
    #[serde(default)]
    pub parent_id: Option<CommentId>,
    /// Posting time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Row inserted when a user posts a comment.
#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    /// Game commented on.
    pub game_id: GameId,
    /// Author subject.
    pub auth_user_id: SubjectId,
    /// Comment text.
    pub content: String,
    /// Comment replied to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CommentId>,
}

/// Star rating plus optional review text, unique per (user, game).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    /// Reviewer subject.
    pub user_id: SubjectId,
    /// Reviewed game.
    pub game_id: GameId,
    /// Stars, 1 to 5.
    pub rating: u8,
    /// Optional review text.
    #[serde(default)]
    pub comment: Option<String>,
    /// Time of the last write.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

/// Per-user notification row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    /// Server-assigned id.
    pub id: NotificationId,
    /// Profile the notification is addressed to.
    pub user_id: Uuid,
    /// Notification type, e.g. `new_game`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Game the notification refers to.
    #[serde(default, alias = "gameId")]
    pub game_id: Option<GameId>,
    /// Whether the user has seen it.
    #[serde(default)]
    pub read: bool,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Row inserted for a new notification.
#[derive(Debug, Clone, Serialize)]
pub struct NewNotification {
    /// Recipient profile.
    pub user_id: Uuid,
    /// Notification type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Game the notification refers to.
    pub game_id: Option<GameId>,
    /// Initial read flag.
    pub read: bool,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn game_from(value: serde_json::Value) -> Game {
        serde_json::from_value(value).expect("game row")
    }

    #[test]
    fn missing_collections_default_to_empty() {
        let game = game_from(json!({ "id": 1, "name": "Sea of Thieves", "images": null, "links": null }));
        assert!(game.images.is_empty());
        assert!(game.links.is_empty());

        let game = game_from(json!({ "id": 2, "name": "Hades" }));
        assert!(game.images.is_empty());
        assert!(game.links.is_empty());
    }

    #[test]
    fn legacy_links_are_upgraded_on_read() {
        let game = game_from(json!({ "id": 1, "name": "x", "links": "https://a" }));
        assert_eq!(game.links, vec![Link::new("", "https://a")]);

        let game = game_from(json!({
            "id": 1,
            "name": "x",
            "links": ["https://a", { "name": "Mirror", "url": "https://b" }]
        }));
        assert_eq!(
            game.links,
            vec![Link::new("", "https://a"), Link::new("Mirror", "https://b")]
        );
    }

    #[test]
    fn role_defaults_to_user() {
        let profile: Profile = serde_json::from_value(json!({
            "id": Uuid::nil(),
            "auth_user_id": Uuid::nil(),
            "username": "jack",
            "role": null
        }))
        .unwrap();
        assert_eq!(profile.role, Role::User);
        assert!(!profile.provisional);

        let role: Role = serde_json::from_value(json!("ADMIN")).unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn cover_prefers_explicit_image() {
        let mut game = game_from(json!({ "id": 1, "name": "x", "images": ["a.png", "b.png"] }));
        assert_eq!(game.cover_image(), Some("a.png"));
        game.image = Some("cover.png".into());
        assert_eq!(game.cover_image(), Some("cover.png"));
    }

    #[test]
    fn link_label_falls_back_to_url() {
        assert_eq!(Link::new("", "https://a").label(), "https://a");
        assert_eq!(Link::new("Torrent", "https://a").label(), "Torrent");
    }
}
