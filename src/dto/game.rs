use std::{fmt, str::FromStr};

use serde::Deserialize;
use serde_json::{Value, json};
use validator::{Validate, ValidationError};

use crate::{
    dao::models::{Game, Link, NewGame, normalize_links},
    dto::validation::non_blank,
};

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Payload of the admin "add game" form.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateGameRequest {
    /// Title; required.
    #[validate(custom(function = "non_blank"))]
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
    /// Cover image URL.
    #[serde(default)]
    pub image: Option<String>,
    /// Gallery image URLs.
    #[serde(default)]
    pub images: Vec<String>,
    /// Download links.
    #[serde(default)]
    pub links: Vec<Link>,
}

impl CreateGameRequest {
    /// Form with only the title filled.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Row to insert: trimmed text, blank optionals dropped, empty link rows removed.
    pub fn into_new_game(self) -> NewGame {
        NewGame {
            name: self.name.trim().to_string(),
            genre: clean(self.genre),
            description: clean(self.description),
            notes: clean(self.notes),
            image: clean(self.image),
            images: self
                .images
                .into_iter()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect(),
            links: self
                .links
                .into_iter()
                .filter(|link| !(link.name.trim().is_empty() && link.url.trim().is_empty()))
                .collect(),
        }
    }
}

/// Editable column of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameField {
    /// `name`
    Name,
    /// `genre`
    Genre,
    /// `description`
    Description,
    /// `notes`
    Notes,
    /// `image`
    Image,
    /// `images`
    Images,
    /// `links`
    Links,
    /// `rating`
    Rating,
}

impl GameField {
    /// Column name in the games table.
    pub fn column(self) -> &'static str {
        match self {
            GameField::Name => "name",
            GameField::Genre => "genre",
            GameField::Description => "description",
            GameField::Notes => "notes",
            GameField::Image => "image",
            GameField::Images => "images",
            GameField::Links => "links",
            GameField::Rating => "rating",
        }
    }
}

impl FromStr for GameField {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "name" => GameField::Name,
            "genre" => GameField::Genre,
            "description" => GameField::Description,
            "notes" => GameField::Notes,
            "image" => GameField::Image,
            "images" => GameField::Images,
            "links" => GameField::Links,
            "rating" => GameField::Rating,
            _ => return Err(invalid("unknown_field", "unknown game field")),
        })
    }
}

impl fmt::Display for GameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn optional_text(value: Value) -> Result<Option<String>, ValidationError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(clean(Some(text))),
        _ => Err(invalid("not_text", "expected text")),
    }
}

/// A typed single-field edit, normalized before it reaches the store.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// New title, trimmed and non-blank.
    Name(String),
    /// New genre; `None` clears it.
    Genre(Option<String>),
    /// New description; `None` clears it.
    Description(Option<String>),
    /// New notes; `None` clears it.
    Notes(Option<String>),
    /// New cover image; `None` clears it.
    Image(Option<String>),
    /// Whole gallery array.
    Images(Vec<String>),
    /// Whole normalized links array.
    Links(Vec<Link>),
    /// New rating; `None` clears it.
    Rating(Option<f64>),
}

impl FieldUpdate {
    /// Interpret a raw form value for `field`.
    ///
    /// Links accept every legacy shape (a bare string becomes `[{name: "", url}]`);
    /// images accept a single URL or a list.
    pub fn from_value(field: GameField, value: Value) -> Result<Self, ValidationError> {
        Ok(match field {
            GameField::Name => match value {
                Value::String(name) => {
                    non_blank(&name)?;
                    FieldUpdate::Name(name.trim().to_string())
                }
                _ => return Err(invalid("not_text", "expected text")),
            },
            GameField::Genre => FieldUpdate::Genre(optional_text(value)?),
            GameField::Description => FieldUpdate::Description(optional_text(value)?),
            GameField::Notes => FieldUpdate::Notes(optional_text(value)?),
            GameField::Image => FieldUpdate::Image(optional_text(value)?),
            GameField::Images => FieldUpdate::Images(match value {
                Value::Null => Vec::new(),
                Value::String(url) => clean(Some(url)).into_iter().collect(),
                other => serde_json::from_value(other)
                    .map_err(|_| invalid("not_url_list", "expected a list of URLs"))?,
            }),
            GameField::Links => FieldUpdate::Links(
                normalize_links(value).map_err(|_| invalid("not_links", "expected links"))?,
            ),
            GameField::Rating => FieldUpdate::Rating(match value {
                Value::Null => None,
                Value::Number(number) => number.as_f64(),
                _ => return Err(invalid("not_number", "expected a number")),
            }),
        })
    }

    /// Field the update targets.
    pub fn field(&self) -> GameField {
        match self {
            FieldUpdate::Name(_) => GameField::Name,
            FieldUpdate::Genre(_) => GameField::Genre,
            FieldUpdate::Description(_) => GameField::Description,
            FieldUpdate::Notes(_) => GameField::Notes,
            FieldUpdate::Image(_) => GameField::Image,
            FieldUpdate::Images(_) => GameField::Images,
            FieldUpdate::Links(_) => GameField::Links,
            FieldUpdate::Rating(_) => GameField::Rating,
        }
    }

    /// Column value written to the store.
    pub fn value(&self) -> Value {
        fn text(value: &Option<String>) -> Value {
            value.clone().map(Value::String).unwrap_or(Value::Null)
        }
        match self {
            FieldUpdate::Name(name) => Value::String(name.clone()),
            FieldUpdate::Genre(value)
            | FieldUpdate::Description(value)
            | FieldUpdate::Notes(value)
            | FieldUpdate::Image(value) => text(value),
            FieldUpdate::Images(images) => json!(images),
            FieldUpdate::Links(links) => json!(links),
            FieldUpdate::Rating(rating) => json!(rating),
        }
    }

    /// Apply the update to a local copy of the game.
    pub fn apply(&self, game: &mut Game) {
        match self {
            FieldUpdate::Name(name) => game.name = name.clone(),
            FieldUpdate::Genre(genre) => game.genre = genre.clone(),
            FieldUpdate::Description(description) => game.description = description.clone(),
            FieldUpdate::Notes(notes) => game.notes = notes.clone(),
            FieldUpdate::Image(image) => game.image = image.clone(),
            FieldUpdate::Images(images) => game.images = images.clone(),
            FieldUpdate::Links(links) => game.links = links.clone(),
            FieldUpdate::Rating(rating) => game.rating = *rating,
        }
    }
}

/// Edit applied to one link of a game.
///
/// A bare string is the legacy link shape: it becomes `{name: "", url}` and
/// replaces both fields. An object only overwrites the fields it carries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LinkEdit {
    /// Bare URL replacing the whole link.
    Legacy(String),
    /// Fields to overwrite.
    Partial {
        /// New label.
        #[serde(default)]
        name: Option<String>,
        /// New URL.
        #[serde(default)]
        url: Option<String>,
    },
}

impl LinkEdit {
    /// Apply the edit to `link`.
    pub fn merge_into(self, link: &mut Link) {
        match self {
            LinkEdit::Legacy(url) => *link = Link::from(url),
            LinkEdit::Partial { name, url } => {
                if let Some(name) = name {
                    link.name = name;
                }
                if let Some(url) = url {
                    link.url = url;
                }
            }
        }
    }
}

impl From<&str> for LinkEdit {
    fn from(url: &str) -> Self {
        LinkEdit::Legacy(url.to_string())
    }
}
