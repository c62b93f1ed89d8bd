//! Campaign body templates.
//!
//! Placeholders take the form `{{.Field}}`, whitespace inside the braces
//! being ignored. Templates are parsed up front, so a template that parses
//! always renders.

use crate::subscriber::Subscriber;
use crate::{ErrorKind, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    FirstName,
    LastName,
    Email,
    UnsubscribeUrl,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "FirstName" => Some(Self::FirstName),
            "LastName" => Some(Self::LastName),
            "Email" => Some(Self::Email),
            "UnsubscribeURL" | "UnsubscribeUrl" => Some(Self::UnsubscribeUrl),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Text(String),
    Field(Field),
}

/// Values substituted into a template for a single recipient.
#[derive(Clone, Copy, Debug)]
pub struct Fields<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub unsubscribe_url: &'a str,
}

impl<'a> Fields<'a> {
    pub fn for_subscriber(subscriber: &'a Subscriber, unsubscribe_url: &'a str) -> Self {
        Self {
            first_name: &subscriber.first_name,
            last_name: &subscriber.last_name,
            email: &subscriber.email,
            unsubscribe_url,
        }
    }

    fn get(&self, field: Field) -> &'a str {
        match field {
            Field::FirstName => self.first_name,
            Field::LastName => self.last_name,
            Field::Email => self.email,
            Field::UnsubscribeUrl => self.unsubscribe_url,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                ErrorKind::Template(format!(
                    "unclosed placeholder at byte {}",
                    source.len() - rest.len() + start
                ))
            })?;

            let name = after[..end].trim();
            let name = name
                .strip_prefix('.')
                .ok_or_else(|| ErrorKind::Template(format!("placeholder must start with '.': {{{{{}}}}}", name)))?;
            let field = Field::parse(name.trim())
                .ok_or_else(|| ErrorKind::Template(format!("unknown field: {}", name)))?;
            segments.push(Segment::Field(field));

            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, fields: &Fields<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(fields.get(*field)),
            }
        }
        out
    }

    pub fn uses(&self, field: Field) -> bool {
        self.segments.contains(&Segment::Field(field))
    }
}
