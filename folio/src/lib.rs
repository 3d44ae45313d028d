//! Chat and plan document library.
//! Documents are `.mdx` files: a frontmatter header followed by a markdown body.
//! Decoding, segmenting, rendering and serializing stay pure; only `storage`
//! touches the filesystem.

pub mod core {
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------- Kinds ------------------------------- */

    /// The two document collections.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum DocKind {
        Chat,
        Plan,
    }

    impl DocKind {
        /// Collection directory under the store root.
        pub fn dir_name(self) -> &'static str {
            match self {
                DocKind::Chat => "chats",
                DocKind::Plan => "plans",
            }
        }

        pub fn as_str(self) -> &'static str {
            match self {
                DocKind::Chat => "chat",
                DocKind::Plan => "plan",
            }
        }
    }

    impl fmt::Display for DocKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /* ---------------------------- Field values ---------------------------- */

    /// Scalar allowed inside a record.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum Scalar {
        Bool(bool),
        Number(f64),
        Str(String),
    }

    /// A small record inside a header array (a milestone, an action item).
    pub type Record = IndexMap<String, Scalar>;

    /// Header value as written on disk.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum FieldValue {
        Bool(bool),
        Number(f64),
        Str(String),
        List(Vec<String>),
        Records(Vec<Record>),
    }

    impl From<Scalar> for FieldValue {
        fn from(s: Scalar) -> Self {
            match s {
                Scalar::Bool(b) => FieldValue::Bool(b),
                Scalar::Number(n) => FieldValue::Number(n),
                Scalar::Str(s) => FieldValue::Str(s),
            }
        }
    }

    impl From<&str> for FieldValue {
        fn from(s: &str) -> Self {
            FieldValue::Str(s.to_string())
        }
    }

    /// Ordered header fields; insertion order is the order the encoder writes.
    pub type Fields = IndexMap<String, FieldValue>;

    /* ------------------------------ Header ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ActionItem {
        pub task: String,
        #[serde(default)]
        pub done: bool,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum MilestoneStatus {
        #[default]
        NotStarted,
        InProgress,
        Completed,
    }

    impl MilestoneStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                MilestoneStatus::NotStarted => "not-started",
                MilestoneStatus::InProgress => "in-progress",
                MilestoneStatus::Completed => "completed",
            }
        }

        pub fn parse(s: &str) -> Option<Self> {
            match s.trim() {
                "not-started" => Some(MilestoneStatus::NotStarted),
                "in-progress" => Some(MilestoneStatus::InProgress),
                "completed" => Some(MilestoneStatus::Completed),
                _ => None,
            }
        }

        /// not-started → in-progress → completed → not-started.
        pub fn next(self) -> Self {
            match self {
                MilestoneStatus::NotStarted => MilestoneStatus::InProgress,
                MilestoneStatus::InProgress => MilestoneStatus::Completed,
                MilestoneStatus::Completed => MilestoneStatus::NotStarted,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Milestone {
        pub title: String,
        #[serde(default)]
        pub weeks: String,
        #[serde(default)]
        pub status: MilestoneStatus,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Difficulty {
        Beginner,
        Intermediate,
        Advanced,
    }

    impl Difficulty {
        pub fn as_str(self) -> &'static str {
            match self {
                Difficulty::Beginner => "beginner",
                Difficulty::Intermediate => "intermediate",
                Difficulty::Advanced => "advanced",
            }
        }

        pub fn parse(s: &str) -> Option<Self> {
            match s.trim().to_ascii_lowercase().as_str() {
                "beginner" => Some(Difficulty::Beginner),
                "intermediate" => Some(Difficulty::Intermediate),
                "advanced" => Some(Difficulty::Advanced),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ChatHeader {
        pub title: String,
        pub date: NaiveDate,
        #[serde(default)]
        pub tags: Vec<String>,
        pub tldr: Option<String>,
        #[serde(default)]
        pub action_items: Vec<ActionItem>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PlanHeader {
        pub title: String,
        pub date: NaiveDate,
        #[serde(default)]
        pub tags: Vec<String>,
        pub tldr: Option<String>,
        pub icon: Option<String>,
        pub duration: Option<String>,
        pub difficulty: Option<Difficulty>,
        #[serde(default)]
        pub milestones: Vec<Milestone>,
    }

    /// Typed frontmatter, one shape per document kind.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "lowercase")]
    pub enum Header {
        Chat(ChatHeader),
        Plan(PlanHeader),
    }

    impl Header {
        pub fn kind(&self) -> DocKind {
            match self {
                Header::Chat(_) => DocKind::Chat,
                Header::Plan(_) => DocKind::Plan,
            }
        }

        pub fn title(&self) -> &str {
            match self {
                Header::Chat(h) => &h.title,
                Header::Plan(h) => &h.title,
            }
        }

        pub fn date(&self) -> NaiveDate {
            match self {
                Header::Chat(h) => h.date,
                Header::Plan(h) => h.date,
            }
        }

        pub fn tags(&self) -> &[String] {
            match self {
                Header::Chat(h) => &h.tags,
                Header::Plan(h) => &h.tags,
            }
        }

        pub fn tldr(&self) -> Option<&str> {
            match self {
                Header::Chat(h) => h.tldr.as_deref(),
                Header::Plan(h) => h.tldr.as_deref(),
            }
        }

        /// Copy of this header with `tags` replaced.
        pub fn with_tags(&self, tags: Vec<String>) -> Header {
            match self {
                Header::Chat(h) => Header::Chat(ChatHeader { tags, ..h.clone() }),
                Header::Plan(h) => Header::Plan(PlanHeader { tags, ..h.clone() }),
            }
        }

        /// Fields in the fixed write order for this kind. Absent optionals are omitted.
        pub fn to_fields(&self) -> Fields {
            let mut fields = Fields::new();
            fields.insert("title".into(), FieldValue::Str(self.title().to_string()));
            fields.insert("date".into(), FieldValue::Str(self.date().to_string()));
            fields.insert("tags".into(), FieldValue::List(self.tags().to_vec()));
            if let Some(tldr) = self.tldr() {
                fields.insert("tldr".into(), FieldValue::Str(tldr.to_string()));
            }
            match self {
                Header::Chat(h) => {
                    let items = h.action_items.iter().map(ActionItem::to_record).collect();
                    fields.insert("action_items".into(), FieldValue::Records(items));
                }
                Header::Plan(h) => {
                    if let Some(icon) = &h.icon {
                        fields.insert("icon".into(), FieldValue::Str(icon.clone()));
                    }
                    if let Some(duration) = &h.duration {
                        fields.insert("duration".into(), FieldValue::Str(duration.clone()));
                    }
                    if let Some(difficulty) = h.difficulty {
                        fields.insert("difficulty".into(), difficulty.as_str().into());
                    }
                    let items = h.milestones.iter().map(Milestone::to_record).collect();
                    fields.insert("milestones".into(), FieldValue::Records(items));
                }
            }
            fields
        }

        /// Build a typed header from decoded fields. Unknown fields are ignored.
        pub fn from_fields(kind: DocKind, fields: &Fields) -> Result<Header, DomainError> {
            let title = optional_str(fields, "title")?
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| DomainError::MissingField("title".into()))?;
            let date = parse_date(
                &optional_str(fields, "date")?
                    .ok_or_else(|| DomainError::MissingField("date".into()))?,
            )?;
            let tags = string_list(fields, "tags")?;
            let tldr = optional_str(fields, "tldr")?;

            match kind {
                DocKind::Chat => {
                    let action_items = records(fields, "action_items")?
                        .iter()
                        .map(ActionItem::from_record)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Header::Chat(ChatHeader {
                        title,
                        date,
                        tags,
                        tldr,
                        action_items,
                    }))
                }
                DocKind::Plan => {
                    let difficulty = match optional_str(fields, "difficulty")? {
                        Some(raw) => Some(
                            Difficulty::parse(&raw).ok_or(DomainError::InvalidDifficulty(raw))?,
                        ),
                        None => None,
                    };
                    let milestones = records(fields, "milestones")?
                        .iter()
                        .map(Milestone::from_record)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Header::Plan(PlanHeader {
                        title,
                        date,
                        tags,
                        tldr,
                        icon: optional_str(fields, "icon")?,
                        duration: optional_str(fields, "duration")?,
                        difficulty,
                        milestones,
                    }))
                }
            }
        }
    }

    impl ActionItem {
        pub fn to_record(&self) -> Record {
            let mut r = Record::new();
            r.insert("task".into(), Scalar::Str(self.task.clone()));
            r.insert("done".into(), Scalar::Bool(self.done));
            r
        }

        pub fn from_record(r: &Record) -> Result<Self, DomainError> {
            let task = match r.get("task") {
                Some(s) => scalar_text(s),
                None => return Err(DomainError::MissingField("action_items.task".into())),
            };
            let done = match r.get("done") {
                None => false,
                Some(Scalar::Bool(b)) => *b,
                Some(_) => {
                    return Err(DomainError::WrongType {
                        field: "action_items.done".into(),
                        expected: "boolean",
                    });
                }
            };
            Ok(Self { task, done })
        }
    }

    impl Milestone {
        pub fn to_record(&self) -> Record {
            let mut r = Record::new();
            r.insert("title".into(), Scalar::Str(self.title.clone()));
            r.insert("weeks".into(), Scalar::Str(self.weeks.clone()));
            r.insert("status".into(), Scalar::Str(self.status.as_str().into()));
            r
        }

        /// Unknown or missing status falls back to `not-started`.
        pub fn from_record(r: &Record) -> Result<Self, DomainError> {
            let title = match r.get("title") {
                Some(s) => scalar_text(s),
                None => return Err(DomainError::MissingField("milestones.title".into())),
            };
            let weeks = r.get("weeks").map(scalar_text).unwrap_or_default();
            let status = r
                .get("status")
                .map(scalar_text)
                .and_then(|s| MilestoneStatus::parse(&s))
                .unwrap_or_default();
            Ok(Self {
                title,
                weeks,
                status,
            })
        }
    }

    fn scalar_text(s: &Scalar) -> String {
        match s {
            Scalar::Str(s) => s.clone(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
        }
    }

    fn optional_str(fields: &Fields, key: &str) -> Result<Option<String>, DomainError> {
        match fields.get(key) {
            None => Ok(None),
            Some(FieldValue::Str(s)) => Ok(Some(s.clone())),
            Some(FieldValue::Number(n)) => Ok(Some(n.to_string())),
            Some(FieldValue::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(DomainError::WrongType {
                field: key.to_string(),
                expected: "string",
            }),
        }
    }

    fn string_list(fields: &Fields, key: &str) -> Result<Vec<String>, DomainError> {
        match fields.get(key) {
            None => Ok(vec![]),
            Some(FieldValue::List(items)) => Ok(items.clone()),
            Some(FieldValue::Records(r)) if r.is_empty() => Ok(vec![]),
            Some(FieldValue::Str(s)) if s.trim().is_empty() => Ok(vec![]),
            Some(_) => Err(DomainError::WrongType {
                field: key.to_string(),
                expected: "list of strings",
            }),
        }
    }

    fn records(fields: &Fields, key: &str) -> Result<Vec<Record>, DomainError> {
        match fields.get(key) {
            None => Ok(vec![]),
            Some(FieldValue::Records(r)) => Ok(r.clone()),
            // `key: []` is how an empty record array is written.
            Some(FieldValue::List(items)) if items.is_empty() => Ok(vec![]),
            Some(FieldValue::Str(s)) if s.trim().is_empty() => Ok(vec![]),
            Some(_) => Err(DomainError::WrongType {
                field: key.to_string(),
                expected: "list of records",
            }),
        }
    }

    fn parse_date(raw: &str) -> Result<NaiveDate, DomainError> {
        let raw = raw.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .or_else(|_| {
                // Tolerate full timestamps such as 2026-02-25T09:30:00Z.
                raw.get(..10)
                    .ok_or(())
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| ()))
            })
            .map_err(|_| DomainError::InvalidDate(raw.to_string()))
    }

    /* ------------------------------ Document ------------------------------ */

    /// A decoded document: typed header plus raw body text.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Document {
        pub kind: DocKind,
        pub filename: String,
        pub header: Header,
        pub body: String,
        /// Header fields as read from disk, in file order. Empty for documents built in memory.
        #[serde(default)]
        pub fields: Fields,
    }

    impl Document {
        /// Intro text and the flat section list of the body.
        pub fn sections(&self) -> (String, Vec<Section>) {
            crate::segment::segment_sections(&self.body)
        }

        /// Role-tagged turns of a chat body.
        pub fn messages(&self) -> Vec<Message> {
            crate::segment::segment_messages(&self.body)
        }

        /// Fields to write: the fields read from disk with changed typed values merged in.
        ///
        /// Unknown fields and typed fields whose value did not change keep their original
        /// text and position; new typed fields are appended.
        pub fn merged_fields(&self) -> Fields {
            let before = Header::from_fields(self.kind, &self.fields)
                .map(|h| h.to_fields())
                .unwrap_or_default();
            let mut out = self.fields.clone();
            for (key, value) in self.header.to_fields() {
                if out.contains_key(&key) && before.get(&key) == Some(&value) {
                    continue;
                }
                out.insert(key, value);
            }
            out
        }

        /// Full on-disk text for this document.
        pub fn to_text(&self) -> String {
            crate::serialize::assemble_document(&self.merged_fields(), &self.body)
        }
    }

    /* ------------------------------ Segments ------------------------------ */

    /// A heading-delimited part of a body. Stored flat; level 3 nests under the
    /// preceding level 2 only when rendered.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Section {
        pub level: u8,
        pub title: String,
        pub content: String,
    }

    impl Section {
        pub const MAJOR: u8 = 2;
        pub const MINOR: u8 = 3;

        pub fn new(
            level: u8,
            title: impl Into<String>,
            content: impl Into<String>,
        ) -> Result<Self, DomainError> {
            if !(Self::MAJOR..=Self::MINOR).contains(&level) {
                return Err(DomainError::InvalidLevel(level));
            }
            Ok(Self {
                level,
                title: title.into(),
                content: content.into(),
            })
        }

        pub fn is_minor(&self) -> bool {
            self.level == Self::MINOR
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        User,
        Ai,
    }

    impl Role {
        /// Case-insensitive match of a heading label.
        pub fn from_label(label: &str) -> Option<Self> {
            match label.trim().to_ascii_lowercase().as_str() {
                "user" => Some(Role::User),
                "ai" => Some(Role::Ai),
                _ => None,
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                Role::User => "User",
                Role::Ai => "AI",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Message {
        pub role: Role,
        pub content: String,
    }

    /* ---------------------------- Presentation ---------------------------- */

    /// Block-level elements produced by the renderer. Never persisted.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Block {
        Paragraph(RichText),
        /// A `#`..`######` line left inside chunk content, such as `### ` within a chat
        /// message. Section and message boundaries never reach the renderer.
        Heading { level: u8, text: RichText },
        UnorderedList(Vec<RichText>),
        OrderedList(Vec<RichText>),
        Checklist(Vec<ChecklistItem>),
        Blockquote(RichText),
        Callout { icon: String, text: RichText },
        Divider,
        Code { language: String, code: String },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ChecklistItem {
        pub checked: bool,
        pub text: RichText,
        /// Trimmed source line, the handle used to toggle this item.
        pub raw: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct RichText {
        #[serde(default)]
        pub inlines: Vec<Inline>,
    }

    /// Inline spans. Span contents are literal; spans do not nest.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Inline {
        Text(String),
        Bold(String),
        Italic(String),
        Code(String),
        Link { text: String, url: String },
    }

    impl RichText {
        /// Text without markup, useful for titles and search.
        pub fn plain_text(&self) -> String {
            let mut out = String::new();
            for inline in &self.inlines {
                match inline {
                    Inline::Text(t) | Inline::Bold(t) | Inline::Italic(t) | Inline::Code(t) => {
                        out.push_str(t)
                    }
                    Inline::Link { text, .. } => out.push_str(text),
                }
            }
            out
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum DomainError {
        #[error("section level {0} is out of bounds (2..=3)")]
        InvalidLevel(u8),
        #[error("missing required field `{0}`")]
        MissingField(String),
        #[error("invalid date {0:?} (expected YYYY-MM-DD)")]
        InvalidDate(String),
        #[error("invalid difficulty {0:?}")]
        InvalidDifficulty(String),
        #[error("field `{field}` should be a {expected}")]
        WrongType {
            field: String,
            expected: &'static str,
        },
    }

}

pub mod frontmatter {
    //! Frontmatter codec.
    //!
    //! Two readers with different contracts live here:
    //! - `decode_listing` is best-effort and lossy: top-level scalars only, used for listings.
    //! - `decode` is the authoritative reader paired with `encode`; it rebuilds inline lists and
    //!   record blocks so an edit can re-encode the header byte for byte.

    use crate::core::*;
    use indexmap::IndexMap;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{take_till1, take_while1},
        character::complete::{anychar, char, line_ending, not_line_ending, space0, space1},
        combinator::{map, not, opt},
        error::{VerboseError, VerboseErrorKind},
        multi::{many0, separated_list0},
        sequence::{delimited, preceded, terminated, tuple},
    };

    const DELIMITER: &str = "---";

    #[derive(Debug, thiserror::Error)]
    pub enum FrontmatterError {
        #[error("{0}")]
        Parse(String),
        #[error(transparent)]
        Domain(#[from] DomainError),
    }

    /* ------------------------ Public entry points ------------------------ */

    /// Split raw text into `(header, body)`.
    ///
    /// The header exists only when the first line is `---` and a later line is exactly `---`.
    /// The body starts after the closing line, minus the single blank separator line.
    pub fn split_document(text: &str) -> (Option<&str>, &str) {
        let Some(rest) = text
            .strip_prefix("---\n")
            .or_else(|| text.strip_prefix("---\r\n"))
        else {
            return (None, text);
        };

        let mut offset = 0;
        for line in rest.split_inclusive('\n') {
            if line.trim_end_matches(['\r', '\n']) == DELIMITER {
                let header = &rest[..offset];
                let body = &rest[offset + line.len()..];
                let body = body
                    .strip_prefix("\r\n")
                    .or_else(|| body.strip_prefix('\n'))
                    .unwrap_or(body);
                return (Some(header), body);
            }
            offset += line.len();
        }
        (None, text)
    }

    /// Best-effort header reader for listings. Never fails: no header means an empty map.
    ///
    /// Only non-indented `key: value` lines count. Surrounding double quotes are stripped but
    /// nothing is unescaped, and record blocks are skipped entirely.
    pub fn decode_listing(text: &str) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        let (Some(header), _) = split_document(text) else {
            return out;
        };
        for line in header.lines() {
            if line.starts_with(char::is_whitespace) {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            out.insert(key.to_string(), strip_quotes(value.trim()).to_string());
        }
        out
    }

    /// Best-effort split of an inline list value as returned by `decode_listing`.
    pub fn listing_list(raw: &str) -> Vec<String> {
        let raw = raw.trim();
        let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) else {
            return if raw.is_empty() {
                vec![]
            } else {
                vec![raw.to_string()]
            };
        };
        inner
            .split(',')
            .map(|item| strip_quotes(item.trim()).to_string())
            .filter(|item| !item.is_empty())
            .collect()
    }

    /// Authoritative encoder used on every save path. Lines joined with `\n`, no trailing newline.
    pub fn encode(fields: &Fields) -> String {
        let mut lines = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            match value {
                FieldValue::Records(records) if records.iter().any(|r| !r.is_empty()) => {
                    lines.push(format!("{key}:"));
                    for record in records {
                        for (idx, (name, scalar)) in record.iter().enumerate() {
                            let lead = if idx == 0 { "  - " } else { "    " };
                            lines.push(format!("{lead}{name}: {}", encode_scalar(scalar)));
                        }
                    }
                }
                FieldValue::Records(_) => lines.push(format!("{key}: []")),
                FieldValue::List(items) => lines.push(format!("{key}: {}", encode_list(items))),
                FieldValue::Str(s) => lines.push(format!("{key}: {}", quote(s))),
                FieldValue::Bool(b) => lines.push(format!("{key}: {b}")),
                FieldValue::Number(n) => lines.push(format!("{key}: {n}")),
            }
        }
        lines.join("\n")
    }

    /// Authoritative decoder for edits. A document without a header decodes to no fields.
    pub fn decode(text: &str) -> Result<Fields, FrontmatterError> {
        match split_document(text) {
            (Some(header), _) => decode_header(header),
            (None, _) => Ok(Fields::new()),
        }
    }

    /// Decode the text between the delimiters.
    pub fn decode_header(header: &str) -> Result<Fields, FrontmatterError> {
        match parse_fields(header) {
            Ok((_, fields)) => Ok(fields),
            Err(nom::Err::Error(ve)) | Err(nom::Err::Failure(ve)) => {
                Err(FrontmatterError::Parse(pretty_verbose_error(ve)))
            }
            Err(nom::Err::Incomplete(_)) => Err(FrontmatterError::Parse(
                "incomplete input while parsing frontmatter".into(),
            )),
        }
    }

    /// Decode a whole document into its typed form.
    pub fn parse_document(
        kind: DocKind,
        filename: &str,
        text: &str,
    ) -> Result<Document, FrontmatterError> {
        let fields = decode(text)?;
        let header = Header::from_fields(kind, &fields)?;
        let (_, body) = split_document(text);
        Ok(Document {
            kind,
            filename: filename.to_string(),
            header,
            body: body.to_string(),
            fields,
        })
    }

    /* ------------------------------ Encoding ------------------------------ */

    fn encode_scalar(s: &Scalar) -> String {
        match s {
            Scalar::Str(s) => quote(s),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
        }
    }

    fn encode_list(items: &[String]) -> String {
        let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
        format!("[{}]", quoted.join(", "))
    }

    /// Backslashes first, then quotes; newlines become `\n` so a value stays on one line.
    fn quote(s: &str) -> String {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('"');
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                c => out.push(c),
            }
        }
        out.push('"');
        out
    }

    fn strip_quotes(value: &str) -> &str {
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            &value[1..value.len() - 1]
        } else {
            value
        }
    }

    /* ------------------------------ Decoding ------------------------------ */

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn pretty_verbose_error(ve: VerboseError<&str>) -> String {
        use std::fmt::Write;
        let mut s = String::new();
        let _ = writeln!(s, "parse error in frontmatter:");
        for (frag, kind) in ve.errors {
            let show = frag
                .get(0..frag.find('\n').unwrap_or(frag.len()))
                .unwrap_or(frag);
            let _ = writeln!(s, "  at: {:?}  {:?}", show, kind);
        }
        s
    }

    fn context_error<'a, T>(i: &'a str, ctx: &'static str) -> PResult<'a, T> {
        Err(nom::Err::Error(VerboseError {
            errors: vec![(i, VerboseErrorKind::Context(ctx))],
        }))
    }

    fn till_eol(i: &str) -> PResult<'_, &str> {
        terminated(not_line_ending, opt(line_ending))(i)
    }

    fn blank_line(i: &str) -> PResult<'_, &str> {
        terminated(space0, line_ending)(i)
    }

    fn is_key_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c == '-'
    }

    fn parse_fields(mut i: &str) -> PResult<'_, Fields> {
        let mut fields = Fields::new();
        loop {
            if i.trim().is_empty() {
                return Ok(("", fields));
            }
            if let Ok((r, _)) = blank_line(i) {
                i = r;
                continue;
            }
            let (r, (key, value)) = parse_field(i)?;
            fields.insert(key.to_string(), value);
            i = r;
        }
    }

    /// `key: value`, or `key:` followed by an indented record block.
    fn parse_field(i: &str) -> PResult<'_, (&str, FieldValue)> {
        let (i, key) = take_while1(is_key_char)(i)?;
        let (i, _) = char(':')(i)?;
        let (i, _) = space0(i)?;
        let (i, raw) = till_eol(i)?;
        let raw = raw.trim_end();
        if !raw.is_empty() {
            return Ok((i, (key, field_value(raw))));
        }
        let (i, records) = many0(parse_record)(i)?;
        if records.is_empty() {
            return Ok((i, (key, FieldValue::Str(String::new()))));
        }
        Ok((i, (key, FieldValue::Records(records))))
    }

    fn field_value(raw: &str) -> FieldValue {
        if raw.starts_with('[') {
            if let Ok((rest, items)) = inline_list(raw) {
                if rest.trim().is_empty() {
                    return FieldValue::List(items);
                }
            }
            return FieldValue::Str(raw.to_string());
        }
        scalar(raw).into()
    }

    /// Quoted strings are unescaped; `true`/`false` and numbers stay typed; anything else is a
    /// bare string.
    fn scalar(raw: &str) -> Scalar {
        if raw.starts_with('"') {
            if let Ok((rest, s)) = quoted(raw) {
                if rest.trim().is_empty() {
                    return Scalar::Str(s);
                }
            }
            return Scalar::Str(raw.to_string());
        }
        match raw {
            "true" => return Scalar::Bool(true),
            "false" => return Scalar::Bool(false),
            _ => {}
        }
        let numeric = raw
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '.');
        match raw.parse::<f64>() {
            Ok(n) if numeric && n.is_finite() => Scalar::Number(n),
            _ => Scalar::Str(raw.to_string()),
        }
    }

    fn quoted(i: &str) -> PResult<'_, String> {
        let (mut i, _) = char('"')(i)?;
        let mut out = String::new();
        loop {
            let (r, c) = anychar(i)?;
            match c {
                '"' => return Ok((r, out)),
                '\n' => return context_error(i, "unterminated string"),
                '\\' => {
                    let (r2, escaped) = anychar(r)?;
                    match escaped {
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                    i = r2;
                }
                c => {
                    out.push(c);
                    i = r;
                }
            }
        }
    }

    fn list_item(i: &str) -> PResult<'_, String> {
        alt((
            quoted,
            map(take_till1(|c: char| c == ',' || c == ']'), |s: &str| {
                s.trim().to_string()
            }),
        ))(i)
    }

    fn inline_list(i: &str) -> PResult<'_, Vec<String>> {
        delimited(
            terminated(char('['), space0),
            separated_list0(
                tuple((space0, char(','), space0)),
                list_item,
            ),
            preceded(space0, char(']')),
        )(i)
    }

    /// One record:
    /// ```text
    ///   - title: "Phase 1"
    ///     weeks: "Weeks 1-4"
    /// ```
    fn parse_record(i: &str) -> PResult<'_, Record> {
        let (i, _) = tuple((space1, char('-'), space1))(i)?;
        let (mut i, (key, value)) = record_entry(i)?;
        let mut record = Record::new();
        record.insert(key.to_string(), value);
        loop {
            match preceded(tuple((space1, not(char('-')))), record_entry)(i) {
                Ok((r, (key, value))) => {
                    record.insert(key.to_string(), value);
                    i = r;
                }
                Err(_) => break,
            }
        }
        Ok((i, record))
    }

    fn record_entry(i: &str) -> PResult<'_, (&str, Scalar)> {
        let (i, key) = take_while1(is_key_char)(i)?;
        let (i, _) = char(':')(i)?;
        let (i, _) = space0(i)?;
        let (i, raw) = till_eol(i)?;
        Ok((i, (key, scalar(raw.trim_end()))))
    }

}

pub mod segment {
    //! Body segmentation. Sections and messages are two split strategies over the same
    //! line scan; both hand raw chunk text to the shared renderer.

    use crate::core::{Message, Role, Section};
    use serde::{Deserialize, Serialize};

    /// Free text before the first boundary, then the chunks in body order.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Split<C> {
        pub intro: String,
        pub chunks: Vec<C>,
    }

    /// Anything the renderer can turn into blocks.
    pub trait ContentChunk {
        /// Display label: a section title or a message role.
        fn label(&self) -> String;
        /// Raw markdown text of the chunk.
        fn content(&self) -> &str;
    }

    impl ContentChunk for Section {
        fn label(&self) -> String {
            self.title.clone()
        }
        fn content(&self) -> &str {
            &self.content
        }
    }

    impl ContentChunk for Message {
        fn label(&self) -> String {
            self.role.label().to_string()
        }
        fn content(&self) -> &str {
            &self.content
        }
    }

    pub trait SplitStrategy {
        type Chunk: ContentChunk;

        fn split(&self, body: &str) -> Split<Self::Chunk>;
    }

    /// Splits on `## ` and `### ` heading lines.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SectionSplitter;

    /// Splits on `## User` / `## AI` heading lines.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MessageSplitter;

    pub fn segment_sections(body: &str) -> (String, Vec<Section>) {
        let split = SectionSplitter.split(body);
        (split.intro, split.chunks)
    }

    pub fn segment_messages(body: &str) -> Vec<Message> {
        MessageSplitter.split(body).chunks
    }

    /// Info string of a line that opens a fenced code block (`` ``` `` or `` ```lang ``).
    pub(crate) fn fence_open(line: &str) -> Option<&str> {
        line.trim_start().strip_prefix("```").map(str::trim)
    }

    /// Only a bare `` ``` `` line closes an open fence.
    pub(crate) fn fence_close(line: &str) -> bool {
        line.trim() == "```"
    }

    fn heading_marker(line: &str) -> Option<(u8, &str)> {
        if let Some(title) = line.strip_prefix("### ") {
            Some((Section::MINOR, title))
        } else {
            line.strip_prefix("## ").map(|title| (Section::MAJOR, title))
        }
    }

    /// Walks body lines, reporting heading lines outside fenced code as boundaries.
    fn scan_lines<'a>(
        body: &'a str,
        is_boundary: impl Fn(&'a str) -> Option<(u8, &'a str)>,
    ) -> (Vec<&'a str>, Vec<(u8, &'a str, Vec<&'a str>)>) {
        let mut intro = Vec::new();
        let mut parts: Vec<(u8, &str, Vec<&str>)> = Vec::new();
        let mut in_fence = false;

        for line in body.lines() {
            if !in_fence {
                if let Some((level, title)) = is_boundary(line) {
                    parts.push((level, title, Vec::new()));
                    continue;
                }
            }
            if in_fence {
                in_fence = !fence_close(line);
            } else {
                in_fence = fence_open(line).is_some();
            }
            match parts.last_mut() {
                Some((_, _, lines)) => lines.push(line),
                None => intro.push(line),
            }
        }
        (intro, parts)
    }

    impl SplitStrategy for SectionSplitter {
        type Chunk = Section;

        fn split(&self, body: &str) -> Split<Section> {
            let (intro, parts) = scan_lines(body, heading_marker);
            let chunks = parts
                .into_iter()
                .map(|(level, title, lines)| Section {
                    level,
                    title: title.trim().to_string(),
                    content: lines.join("\n").trim().to_string(),
                })
                .collect();
            Split {
                intro: intro.join("\n").trim().to_string(),
                chunks,
            }
        }
    }

    impl SplitStrategy for MessageSplitter {
        type Chunk = Message;

        /// Text before the first heading, unknown roles and empty turns are dropped.
        fn split(&self, body: &str) -> Split<Message> {
            let (_, parts) = scan_lines(body, |line| {
                line.strip_prefix("## ").map(|label| (Section::MAJOR, label))
            });
            let chunks = parts
                .into_iter()
                .filter_map(|(_, label, lines)| {
                    let role = Role::from_label(label)?;
                    let content = lines.join("\n").trim().to_string();
                    (!content.is_empty()).then_some(Message { role, content })
                })
                .collect();
            Split {
                intro: String::new(),
                chunks,
            }
        }
    }

}

pub mod render {
    //! Block renderer shared by the chat and plan pipelines.
    //!
    //! Rendering strategy:
    //! - Fenced code spans are cut out first and kept verbatim, so list/quote/divider rules
    //!   never see their lines.
    //! - Remaining lines are classified one by one; only list-like kinds accumulate into runs.
    //! - Inline spans are parsed with `nom`, left to right, first match wins.

    use crate::core::*;
    use crate::segment::{ContentChunk, SplitStrategy, fence_close, fence_open};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_till1, take_until, take_while1, take_while_m_n},
        character::complete::{anychar, char, digit1, one_of, space1},
        combinator::{eof, verify},
        error::VerboseError,
        sequence::{delimited, terminated, tuple},
    };
    use serde::Serialize;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------ Public entry points ------------------------ */

    /// A chunk together with its rendered blocks.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct RenderedChunk<C> {
        pub label: String,
        pub chunk: C,
        pub blocks: Vec<Block>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct RenderedBody<C> {
        pub intro: Vec<Block>,
        pub chunks: Vec<RenderedChunk<C>>,
    }

    /// Split `body` with `strategy` and render every piece through `to_blocks`.
    pub fn render_body<S: SplitStrategy>(strategy: &S, body: &str) -> RenderedBody<S::Chunk> {
        let split = strategy.split(body);
        RenderedBody {
            intro: to_blocks(&split.intro),
            chunks: split
                .chunks
                .into_iter()
                .map(|chunk| RenderedChunk {
                    label: chunk.label(),
                    blocks: to_blocks(chunk.content()),
                    chunk,
                })
                .collect(),
        }
    }

    /// Level 2 section with the level 3 sections that follow it.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct SectionGroup {
        pub section: Section,
        pub children: Vec<Section>,
    }

    /// Nest minor sections under the preceding major one. A minor section with no major
    /// section before it becomes its own group.
    pub fn nest_sections(sections: &[Section]) -> Vec<SectionGroup> {
        let mut groups: Vec<SectionGroup> = Vec::new();
        for section in sections {
            match groups.last_mut() {
                Some(group) if section.is_minor() && !group.section.is_minor() => {
                    group.children.push(section.clone());
                }
                _ => groups.push(SectionGroup {
                    section: section.clone(),
                    children: vec![],
                }),
            }
        }
        groups
    }

    /// Turn raw section/message content into presentation blocks.
    pub fn to_blocks(content: &str) -> Vec<Block> {
        let mut builder = BlockBuilder::default();
        for span in split_fences(content) {
            match span {
                Span::Code { language, code } => builder.push(Block::Code { language, code }),
                Span::Text(lines) => {
                    for line in lines {
                        builder.line(classify(line));
                    }
                    builder.flush();
                }
            }
        }
        builder.finish()
    }

    /// Parse inline spans: `**bold**`, `` `code` ``, `[text](url)`, `*italic*`.
    pub fn parse_inlines(text: &str) -> Vec<Inline> {
        let mut out = Vec::new();
        let mut i = text;
        while !i.is_empty() {
            match inline_span(i) {
                Ok((r, span)) => {
                    out.push(span);
                    i = r;
                }
                Err(_) => {
                    let (r, chunk) = plain_chunk(i);
                    push_text(&mut out, chunk);
                    i = r;
                }
            }
        }
        out
    }

    pub fn rich_text(text: &str) -> RichText {
        RichText {
            inlines: parse_inlines(text),
        }
    }

    /* ---------------------------- Fenced code ---------------------------- */

    enum Span<'a> {
        Text(Vec<&'a str>),
        Code { language: String, code: String },
    }

    /// First pass: cut fenced code out verbatim. An unclosed fence runs to the end.
    fn split_fences(content: &str) -> Vec<Span<'_>> {
        let mut spans = Vec::new();
        let mut text = Vec::new();
        let mut lines = content.lines();
        while let Some(line) = lines.next() {
            let Some(tag) = fence_open(line) else {
                text.push(line);
                continue;
            };
            if !text.is_empty() {
                spans.push(Span::Text(std::mem::take(&mut text)));
            }
            let language = if tag.is_empty() { "text" } else { tag };
            let mut code = Vec::new();
            for inner in lines.by_ref() {
                if fence_close(inner) {
                    break;
                }
                code.push(inner);
            }
            spans.push(Span::Code {
                language: language.to_string(),
                code: code.join("\n"),
            });
        }
        if !text.is_empty() {
            spans.push(Span::Text(text));
        }
        spans
    }

    /* --------------------------- Line classes --------------------------- */

    #[derive(Debug, PartialEq, Eq)]
    enum LineKind<'a> {
        Blank,
        Check { checked: bool, text: &'a str, raw: &'a str },
        Bullet(&'a str),
        Number(&'a str),
        Quote(&'a str),
        Divider,
        Heading(u8, &'a str),
        Text(&'a str),
    }

    fn classify(line: &str) -> LineKind<'_> {
        let line = line.trim();
        if line.is_empty() {
            return LineKind::Blank;
        }
        if let Ok((text, checked)) = checklist_marker(line) {
            return LineKind::Check {
                checked,
                text: text.trim(),
                raw: line,
            };
        }
        if let Ok((text, _)) = bullet_marker(line) {
            return LineKind::Bullet(text);
        }
        if let Ok((text, _)) = ordered_marker(line) {
            return LineKind::Number(text);
        }
        if let Ok((text, _)) = quote_marker(line) {
            return LineKind::Quote(text);
        }
        if line.len() >= 3 && line.chars().all(|c| c == '-') {
            return LineKind::Divider;
        }
        if let Ok((text, hashes)) = heading_marker(line) {
            return LineKind::Heading(hashes.len() as u8, text);
        }
        LineKind::Text(line)
    }

    fn checklist_marker(i: &str) -> PResult<'_, bool> {
        let (i, _) = tag("- [")(i)?;
        let (i, mark) = one_of(" xX")(i)?;
        let (i, _) = char(']')(i)?;
        let (i, _) = alt((space1, eof))(i)?;
        Ok((i, mark != ' '))
    }

    fn bullet_marker(i: &str) -> PResult<'_, &str> {
        terminated(alt((tag("-"), tag("*"))), space1)(i)
    }

    fn ordered_marker(i: &str) -> PResult<'_, &str> {
        terminated(digit1, tuple((char('.'), space1)))(i)
    }

    fn quote_marker(i: &str) -> PResult<'_, &str> {
        alt((tag("> "), terminated(tag(">"), eof)))(i)
    }

    fn heading_marker(i: &str) -> PResult<'_, &str> {
        terminated(take_while_m_n(1, 6, |c: char| c == '#'), space1)(i)
    }

    /// Pictographs, symbols and dingbats that mark a quote as a callout.
    fn is_emoji(c: char) -> bool {
        matches!(
            c as u32,
            0x1F000..=0x1F2FF | 0x1F300..=0x1FAFF | 0x2300..=0x23FF | 0x2600..=0x27BF | 0x2B00..=0x2BFF
        )
    }

    fn quote_block(text: &str) -> Block {
        let mut chars = text.chars();
        if let Some(first) = chars.next().filter(|c| is_emoji(*c)) {
            let mut icon = first.to_string();
            let mut rest = chars.as_str();
            if let Some(tail) = rest.strip_prefix('\u{FE0F}') {
                icon.push('\u{FE0F}');
                rest = tail;
            }
            return Block::Callout {
                icon,
                text: rich_text(rest.trim_start()),
            };
        }
        Block::Blockquote(rich_text(text))
    }

    /* ------------------------------ Builder ------------------------------ */

    /// Open list-like run; at most one at a time.
    enum Run {
        Bullets(Vec<RichText>),
        Numbers(Vec<RichText>),
        Checks(Vec<ChecklistItem>),
    }

    impl Run {
        fn into_block(self) -> Block {
            match self {
                Run::Bullets(items) => Block::UnorderedList(items),
                Run::Numbers(items) => Block::OrderedList(items),
                Run::Checks(items) => Block::Checklist(items),
            }
        }
    }

    #[derive(Default)]
    struct BlockBuilder {
        blocks: Vec<Block>,
        run: Option<Run>,
    }

    impl BlockBuilder {
        fn flush(&mut self) {
            if let Some(run) = self.run.take() {
                self.blocks.push(run.into_block());
            }
        }

        fn push(&mut self, block: Block) {
            self.flush();
            self.blocks.push(block);
        }

        fn line(&mut self, kind: LineKind<'_>) {
            match kind {
                LineKind::Blank => self.flush(),
                LineKind::Check { checked, text, raw } => {
                    let item = ChecklistItem {
                        checked,
                        text: rich_text(text),
                        raw: raw.to_string(),
                    };
                    match &mut self.run {
                        Some(Run::Checks(items)) => items.push(item),
                        _ => {
                            self.flush();
                            self.run = Some(Run::Checks(vec![item]));
                        }
                    }
                }
                LineKind::Bullet(text) => match &mut self.run {
                    Some(Run::Bullets(items)) => items.push(rich_text(text)),
                    _ => {
                        self.flush();
                        self.run = Some(Run::Bullets(vec![rich_text(text)]));
                    }
                },
                LineKind::Number(text) => match &mut self.run {
                    Some(Run::Numbers(items)) => items.push(rich_text(text)),
                    _ => {
                        self.flush();
                        self.run = Some(Run::Numbers(vec![rich_text(text)]));
                    }
                },
                LineKind::Quote(text) => self.push(quote_block(text)),
                LineKind::Divider => self.push(Block::Divider),
                LineKind::Heading(level, text) => self.push(Block::Heading {
                    level,
                    text: rich_text(text),
                }),
                LineKind::Text(text) => self.push(Block::Paragraph(rich_text(text))),
            }
        }

        fn finish(mut self) -> Vec<Block> {
            self.flush();
            self.blocks
        }
    }

    /* --------------------------- INLINE MARKUP --------------------------- */

    fn inline_span(i: &str) -> PResult<'_, Inline> {
        alt((parse_bold, parse_code, parse_link, parse_italic))(i)
    }

    fn parse_bold(i: &str) -> PResult<'_, Inline> {
        let (i, body) = delimited(
            tag("**"),
            verify(take_until("**"), |s: &str| !s.is_empty()),
            tag("**"),
        )(i)?;
        Ok((i, Inline::Bold(body.to_string())))
    }

    fn parse_code(i: &str) -> PResult<'_, Inline> {
        let (i, body) = delimited(char('`'), take_till1(|c: char| c == '`'), char('`'))(i)?;
        Ok((i, Inline::Code(body.to_string())))
    }

    fn parse_link(i: &str) -> PResult<'_, Inline> {
        let (i, (_, text, _, url, _)) = tuple((
            char('['),
            take_till1(|c: char| c == ']'),
            tag("]("),
            take_till1(|c: char| c == ')'),
            char(')'),
        ))(i)?;
        Ok((
            i,
            Inline::Link {
                text: text.to_string(),
                url: url.to_string(),
            },
        ))
    }

    fn parse_italic(i: &str) -> PResult<'_, Inline> {
        let (i, body) = delimited(char('*'), take_till1(|c: char| c == '*'), char('*'))(i)?;
        Ok((i, Inline::Italic(body.to_string())))
    }

    /// Text up to the next possible span opener; a lone opener is taken as one char.
    fn plain_chunk(i: &str) -> (&str, &str) {
        let plain = take_while1::<_, _, VerboseError<&str>>(|c: char| !matches!(c, '*' | '`' | '['))(i);
        match plain {
            Ok((r, s)) => (r, s),
            Err(_) => match anychar::<_, VerboseError<&str>>(i) {
                Ok((r, _)) => (r, &i[..i.len() - r.len()]),
                Err(_) => ("", i),
            },
        }
    }

    fn push_text(out: &mut Vec<Inline>, s: &str) {
        if let Some(Inline::Text(prev)) = out.last_mut() {
            prev.push_str(s);
        } else {
            out.push(Inline::Text(s.to_string()));
        }
    }

    /* ------------------------------ Display ------------------------------ */

    /// Plain-text terminal view of rendered blocks, one blank line between blocks.
    pub fn display_blocks(blocks: &[Block]) -> String {
        let rendered: Vec<String> = blocks.iter().map(display_block).collect();
        rendered.join("\n")
    }

    fn display_block(block: &Block) -> String {
        let mut buf = String::new();
        match block {
            Block::Paragraph(text) => {
                buf.push_str(&display_inlines(&text.inlines));
                buf.push('\n');
            }
            Block::Heading { text, .. } => {
                let title = display_inlines(&text.inlines);
                buf.push_str(&title);
                buf.push('\n');
                buf.push_str(&"-".repeat(title.chars().count().max(3)));
                buf.push('\n');
            }
            Block::UnorderedList(items) => {
                for item in items {
                    buf.push_str("  • ");
                    buf.push_str(&display_inlines(&item.inlines));
                    buf.push('\n');
                }
            }
            Block::OrderedList(items) => {
                for (n, item) in items.iter().enumerate() {
                    buf.push_str(&format!("  {}. ", n + 1));
                    buf.push_str(&display_inlines(&item.inlines));
                    buf.push('\n');
                }
            }
            Block::Checklist(items) => {
                for item in items {
                    buf.push_str(if item.checked { "  [x] " } else { "  [ ] " });
                    buf.push_str(&display_inlines(&item.text.inlines));
                    buf.push('\n');
                }
            }
            Block::Blockquote(text) => {
                buf.push_str("  │ ");
                buf.push_str(&display_inlines(&text.inlines));
                buf.push('\n');
            }
            Block::Callout { icon, text } => {
                buf.push_str("  │ ");
                buf.push_str(icon);
                buf.push(' ');
                buf.push_str(&display_inlines(&text.inlines));
                buf.push('\n');
            }
            Block::Divider => buf.push_str("────────\n"),
            Block::Code { language, code } => {
                buf.push_str(&format!("  [{language}]\n"));
                for line in code.lines() {
                    buf.push_str("    ");
                    buf.push_str(line);
                    buf.push('\n');
                }
            }
        }
        buf
    }

    fn display_inlines(inlines: &[Inline]) -> String {
        let mut buf = String::new();
        for inline in inlines {
            match inline {
                Inline::Text(t) | Inline::Bold(t) | Inline::Italic(t) => buf.push_str(t),
                Inline::Code(t) => {
                    buf.push('`');
                    buf.push_str(t);
                    buf.push('`');
                }
                Inline::Link { text, url } => {
                    buf.push_str(text);
                    buf.push_str(" (");
                    buf.push_str(url);
                    buf.push(')');
                }
            }
        }
        buf
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::segment::{MessageSplitter, SectionSplitter};

        fn text(s: &str) -> RichText {
            RichText {
                inlines: vec![Inline::Text(s.into())],
            }
        }

        #[test]
        fn inline_spans_first_match_wins() {
            let v = parse_inlines("Use **bold**, `code`, [docs](https://x.dev) and *soft* text.");
            assert_eq!(
                v,
                vec![
                    Inline::Text("Use ".into()),
                    Inline::Bold("bold".into()),
                    Inline::Text(", ".into()),
                    Inline::Code("code".into()),
                    Inline::Text(", ".into()),
                    Inline::Link {
                        text: "docs".into(),
                        url: "https://x.dev".into()
                    },
                    Inline::Text(" and ".into()),
                    Inline::Italic("soft".into()),
                    Inline::Text(" text.".into()),
                ]
            );
        }

        #[test]
        fn inline_spans_do_not_nest() {
            let v = parse_inlines("**a `b` c**");
            assert_eq!(v, vec![Inline::Bold("a `b` c".into())]);
        }

        #[test]
        fn unmatched_markers_pass_through() {
            let v = parse_inlines("2 * 3 = [six and `open");
            assert_eq!(v, vec![Inline::Text("2 * 3 = [six and `open".into())]);
        }

        #[test]
        fn lists_group_into_runs_and_break_on_kind_change() {
            let blocks = to_blocks("- one\n* two\n1. first\n2. second\n- [ ] todo\n- [X] done\n\n- again");
            assert_eq!(blocks.len(), 4);
            assert_eq!(blocks[0], Block::UnorderedList(vec![text("one"), text("two")]));
            assert_eq!(
                blocks[1],
                Block::OrderedList(vec![text("first"), text("second")])
            );
            match &blocks[2] {
                Block::Checklist(items) => {
                    assert_eq!(items.len(), 2);
                    assert!(!items[0].checked);
                    assert!(items[1].checked);
                    assert_eq!(items[1].raw, "- [X] done");
                }
                other => panic!("expected checklist, got {:?}", other),
            }
            assert_eq!(blocks[3], Block::UnorderedList(vec![text("again")]));
        }

        #[test]
        fn each_text_line_is_its_own_paragraph() {
            let blocks = to_blocks("first line\nsecond line");
            assert_eq!(
                blocks,
                vec![
                    Block::Paragraph(text("first line")),
                    Block::Paragraph(text("second line"))
                ]
            );
        }

        #[test]
        fn quotes_callouts_dividers_and_headings() {
            let blocks = to_blocks("> plain quote\n> 💡 Tip here\n> ⚠️ Careful\n---\n#### Deep dive");
            assert_eq!(blocks[0], Block::Blockquote(text("plain quote")));
            assert_eq!(
                blocks[1],
                Block::Callout {
                    icon: "💡".into(),
                    text: text("Tip here")
                }
            );
            assert_eq!(
                blocks[2],
                Block::Callout {
                    icon: "⚠\u{FE0F}".into(),
                    text: text("Careful")
                }
            );
            assert_eq!(blocks[3], Block::Divider);
            assert_eq!(
                blocks[4],
                Block::Heading {
                    level: 4,
                    text: text("Deep dive")
                }
            );
        }

        #[test]
        fn fenced_code_is_never_reclassified() {
            let content = "- item\n```\n- not a list\n> not a quote\n---\n```\nafter";
            let blocks = to_blocks(content);
            assert_eq!(blocks.len(), 3);
            assert_eq!(blocks[0], Block::UnorderedList(vec![text("item")]));
            assert_eq!(
                blocks[1],
                Block::Code {
                    language: "text".into(),
                    code: "- not a list\n> not a quote\n---".into()
                }
            );
            assert_eq!(blocks[2], Block::Paragraph(text("after")));
        }

        #[test]
        fn segmenter_and_renderer_agree_on_fence_bounds() {
            let body = "## Doc\n\n```\nexample:\n```md\n## Inside code\n```\n";
            let rendered = render_body(&SectionSplitter, body);
            assert_eq!(rendered.chunks.len(), 1);
            assert_eq!(
                rendered.chunks[0].blocks,
                vec![Block::Code {
                    language: "text".into(),
                    code: "example:\n```md\n## Inside code".into(),
                }]
            );
        }

        #[test]
        fn fence_keeps_language_and_unclosed_fence_runs_to_end() {
            let blocks = to_blocks("```rust\nfn main() {}\n\n  indented");
            assert_eq!(
                blocks,
                vec![Block::Code {
                    language: "rust".into(),
                    code: "fn main() {}\n\n  indented".into()
                }]
            );
        }

        #[test]
        fn both_pipelines_share_the_renderer() {
            let chat = render_body(&MessageSplitter, "## User\n\n- [ ] ask\n\n## AI\n\n**sure**");
            assert!(chat.intro.is_empty());
            assert_eq!(chat.chunks.len(), 2);
            assert_eq!(chat.chunks[0].label, "User");
            assert_eq!(chat.chunks[0].blocks, to_blocks("- [ ] ask"));

            let plan = render_body(&SectionSplitter, "Intro\n\n## Goals\n\n1. learn");
            assert_eq!(plan.intro, vec![Block::Paragraph(text("Intro"))]);
            assert_eq!(plan.chunks[0].blocks, to_blocks("1. learn"));
        }

        #[test]
        fn minor_sections_nest_under_major() {
            let s = |level, title: &str| Section::new(level, title, "").expect("section");
            let groups = nest_sections(&[s(3, "Orphan"), s(2, "A"), s(3, "A.1"), s(3, "A.2"), s(2, "B")]);
            assert_eq!(groups.len(), 3);
            assert_eq!(groups[0].section.title, "Orphan");
            assert!(groups[0].children.is_empty());
            assert_eq!(groups[1].children.len(), 2);
            assert!(groups[2].children.is_empty());
        }

        #[test]
        fn display_renders_terminal_text() {
            let out = display_blocks(&to_blocks("- [x] shipped\n\n> 💡 note\n\n```sh\nls\n```"));
            assert_eq!(out, "  [x] shipped\n\n  │ 💡 note\n\n  [sh]\n    ls\n");
        }
    }
}

pub mod serialize {
    //! Write path: sections back to body text, checklist toggles, whole-document assembly.
    //! Content is joined textually and never re-rendered, so anything the renderer does not
    //! understand survives untouched.

    use crate::core::{Fields, Section};
    use crate::frontmatter::encode;

    /// Rebuild a body from intro text and the flat section list.
    pub fn sections_to_body(intro: &str, sections: &[Section]) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(sections.len() * 2 + 1);
        let intro = intro.trim();
        if !intro.is_empty() {
            parts.push(intro.to_string());
        }
        for section in sections {
            parts.push(format!(
                "{} {}",
                "#".repeat(usize::from(section.level)),
                section.title
            ));
            let content = section.content.trim();
            if !content.is_empty() {
                parts.push(content.to_string());
            }
        }
        parts.join("\n\n")
    }

    /// Flip the checkbox on every line whose trimmed text equals the trimmed `line`.
    ///
    /// Identity is textual: two items with the same text toggle together.
    pub fn toggle_checklist_line(content: &str, line: &str) -> String {
        let target = line.trim();
        content
            .split('\n')
            .map(|l| {
                if l.trim() == target {
                    toggle_marker(l).unwrap_or_else(|| l.to_string())
                } else {
                    l.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn toggle_marker(line: &str) -> Option<String> {
        let indent = line.len() - line.trim_start().len();
        let (lead, rest) = line.split_at(indent);
        let flipped = if let Some(tail) = rest.strip_prefix("- [ ]") {
            format!("- [x]{tail}")
        } else if let Some(tail) = rest
            .strip_prefix("- [x]")
            .or_else(|| rest.strip_prefix("- [X]"))
        {
            format!("- [ ]{tail}")
        } else {
            return None;
        };
        Some(format!("{lead}{flipped}"))
    }

    /// The sole write format: delimited header, one blank line, trimmed body, one newline.
    pub fn assemble_document(fields: &Fields, body: &str) -> String {
        format!("---\n{}\n---\n\n{}\n", encode(fields), body.trim())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::FieldValue;
        use crate::frontmatter::{decode, split_document};
        use crate::segment::segment_sections;

        fn section(level: u8, title: &str, content: &str) -> Section {
            Section::new(level, title, content).expect("section")
        }

        #[test]
        fn sections_join_with_single_blank_lines() {
            let body = sections_to_body(
                "Intro para",
                &[
                    section(2, "Goals", "- ship\n- learn"),
                    section(3, "Stretch", ""),
                    section(2, "Notes", "  spaced  \n"),
                ],
            );
            assert_eq!(
                body,
                "Intro para\n\n## Goals\n\n- ship\n- learn\n\n### Stretch\n\n## Notes\n\nspaced"
            );
        }

        #[test]
        fn empty_intro_is_skipped() {
            let body = sections_to_body("  ", &[section(2, "Only", "x")]);
            assert_eq!(body, "## Only\n\nx");
        }

        #[test]
        fn segment_after_join_round_trips() {
            let intro = "Why this plan exists.";
            let sections = vec![
                section(2, "Phase 1", "1. read\n2. write\n\n```\n- raw\n```"),
                section(3, "Detail", "> 💡 keep notes"),
                section(2, "Phase 2", ""),
            ];
            let body = sections_to_body(intro, &sections);
            let (intro2, sections2) = segment_sections(&body);
            assert_eq!(intro2, intro);
            assert_eq!(sections2, sections);
        }

        #[test]
        fn checklist_toggle_flips_and_restores() {
            let content = "Shopping\n- [ ] Buy milk\n- [ ] Buy eggs";
            let once = toggle_checklist_line(content, "- [ ] Buy milk");
            assert!(once.contains("- [x] Buy milk"));
            assert!(once.contains("- [ ] Buy eggs"));
            let twice = toggle_checklist_line(&once, "- [x] Buy milk");
            assert_eq!(twice, content);
        }

        #[test]
        fn checklist_toggle_hits_every_identical_line() {
            let content = "  - [X] same\n- [X] same\n- [X] other";
            let out = toggle_checklist_line(content, "- [X] same");
            assert_eq!(out, "  - [ ] same\n- [ ] same\n- [X] other");
        }

        #[test]
        fn non_checklist_lines_are_untouched() {
            let content = "same\n- same";
            assert_eq!(toggle_checklist_line(content, "same"), content);
        }

        #[test]
        fn assembled_body_is_trimmed_with_one_newline() {
            let mut fields = Fields::new();
            fields.insert("title".into(), FieldValue::Str("T".into()));
            let text = assemble_document(&fields, "\n\n  Body line\n\n\n");
            assert_eq!(text, "---\ntitle: \"T\"\n---\n\nBody line\n");
            let (_, body) = split_document(&text);
            assert_eq!(body, "Body line\n");
        }

        #[test]
        fn assemble_is_idempotent() {
            let mut fields = Fields::new();
            fields.insert("title".into(), FieldValue::Str("a \\ b".into()));
            fields.insert("tags".into(), FieldValue::List(vec!["x".into()]));
            let first = assemble_document(&fields, "body");
            let again = assemble_document(&decode(&first).expect("decode"), "body");
            assert_eq!(first, again);
        }
    }
}

pub mod edit {
    //! Pure edit operations. Every function returns new values and leaves its input alone;
    //! callers persist the result through the storage layer.

    use crate::core::{ActionItem, Document, Header, Milestone, Section};
    use crate::serialize::{sections_to_body, toggle_checklist_line};

    #[derive(Debug, thiserror::Error, PartialEq, Eq)]
    pub enum EditError {
        #[error("index {index} is out of range ({len} items)")]
        OutOfRange { index: usize, len: usize },
        #[error("operation needs a {expected} document")]
        WrongKind { expected: &'static str },
    }

    fn check_index(index: usize, len: usize) -> Result<(), EditError> {
        if index < len {
            Ok(())
        } else {
            Err(EditError::OutOfRange { index, len })
        }
    }

    pub fn set_section_content(
        sections: &[Section],
        index: usize,
        content: &str,
    ) -> Result<Vec<Section>, EditError> {
        check_index(index, sections.len())?;
        let mut out = sections.to_vec();
        out[index].content = content.to_string();
        Ok(out)
    }

    pub fn set_section_title(
        sections: &[Section],
        index: usize,
        title: &str,
    ) -> Result<Vec<Section>, EditError> {
        check_index(index, sections.len())?;
        let mut out = sections.to_vec();
        out[index].title = title.trim().to_string();
        Ok(out)
    }

    /// New `(intro, sections)` pair with the intro replaced.
    pub fn set_intro(text: &str, sections: &[Section]) -> (String, Vec<Section>) {
        (text.trim().to_string(), sections.to_vec())
    }

    /// Adds a trimmed tag. Blank and already-present tags leave the list unchanged.
    pub fn add_tag(tags: &[String], tag: &str) -> Vec<String> {
        let tag = tag.trim();
        let mut out = tags.to_vec();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
        out
    }

    pub fn remove_tag(tags: &[String], tag: &str) -> Vec<String> {
        let tag = tag.trim();
        tags.iter().filter(|t| *t != tag).cloned().collect()
    }

    /// not-started -> in-progress -> completed -> not-started
    pub fn cycle_milestone_status(
        milestones: &[Milestone],
        index: usize,
    ) -> Result<Vec<Milestone>, EditError> {
        check_index(index, milestones.len())?;
        let mut out = milestones.to_vec();
        out[index].status = out[index].status.next();
        Ok(out)
    }

    pub fn toggle_action_item(
        items: &[ActionItem],
        index: usize,
    ) -> Result<Vec<ActionItem>, EditError> {
        check_index(index, items.len())?;
        let mut out = items.to_vec();
        out[index].done = !out[index].done;
        Ok(out)
    }

    /// Checklist toggle scoped to one section's content.
    pub fn toggle_checklist(
        sections: &[Section],
        index: usize,
        line: &str,
    ) -> Result<Vec<Section>, EditError> {
        check_index(index, sections.len())?;
        let content = toggle_checklist_line(&sections[index].content, line);
        set_section_content(sections, index, &content)
    }

    /* --------------------------- Document level --------------------------- */

    /// Document with its body rebuilt from `intro` and `sections`.
    pub fn replace_sections(doc: &Document, intro: &str, sections: &[Section]) -> Document {
        Document {
            body: sections_to_body(intro, sections),
            ..doc.clone()
        }
    }

    /// Checklist toggle over the whole body, for chats and section-less plans.
    pub fn toggle_body_checklist(doc: &Document, line: &str) -> Document {
        Document {
            body: toggle_checklist_line(&doc.body, line),
            ..doc.clone()
        }
    }

    pub fn retag(doc: &Document, tags: Vec<String>) -> Document {
        Document {
            header: doc.header.with_tags(tags),
            ..doc.clone()
        }
    }

    pub fn cycle_plan_milestone(doc: &Document, index: usize) -> Result<Document, EditError> {
        let Header::Plan(plan) = &doc.header else {
            return Err(EditError::WrongKind { expected: "plan" });
        };
        let mut plan = plan.clone();
        plan.milestones = cycle_milestone_status(&plan.milestones, index)?;
        Ok(Document {
            header: Header::Plan(plan),
            ..doc.clone()
        })
    }

    pub fn toggle_chat_action_item(doc: &Document, index: usize) -> Result<Document, EditError> {
        let Header::Chat(chat) = &doc.header else {
            return Err(EditError::WrongKind { expected: "chat" });
        };
        let mut chat = chat.clone();
        chat.action_items = toggle_action_item(&chat.action_items, index)?;
        Ok(Document {
            header: Header::Chat(chat),
            ..doc.clone()
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{ChatHeader, DocKind, Fields, MilestoneStatus, PlanHeader};
        use chrono::NaiveDate;

        fn sections() -> Vec<Section> {
            vec![
                Section::new(2, "Goals", "- [ ] ship\n- [ ] test").expect("section"),
                Section::new(3, "Notes", "plain").expect("section"),
            ]
        }

        fn plan_doc() -> Document {
            Document {
                kind: DocKind::Plan,
                filename: "rust.mdx".into(),
                header: Header::Plan(PlanHeader {
                    title: "Rust".into(),
                    date: NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
                    tags: vec!["lang".into()],
                    tldr: None,
                    icon: None,
                    duration: None,
                    difficulty: None,
                    milestones: vec![Milestone {
                        title: "Basics".into(),
                        weeks: "1-2".into(),
                        status: MilestoneStatus::NotStarted,
                    }],
                }),
                body: "## Goals\n\n- [ ] ship".into(),
                fields: Fields::new(),
            }
        }

        #[test]
        fn section_edits_leave_input_alone() {
            let before = sections();
            let after = set_section_content(&before, 1, "rewritten").expect("edit");
            assert_eq!(before[1].content, "plain");
            assert_eq!(after[1].content, "rewritten");

            let renamed = set_section_title(&before, 0, "  Aims ").expect("edit");
            assert_eq!(renamed[0].title, "Aims");
        }

        #[test]
        fn out_of_range_is_an_error() {
            assert_eq!(
                set_section_content(&sections(), 5, "x"),
                Err(EditError::OutOfRange { index: 5, len: 2 })
            );
            assert!(cycle_milestone_status(&[], 0).is_err());
            assert!(toggle_action_item(&[], 0).is_err());
        }

        #[test]
        fn intro_is_trimmed() {
            let (intro, secs) = set_intro("\n new intro \n", &sections());
            assert_eq!(intro, "new intro");
            assert_eq!(secs.len(), 2);
        }

        #[test]
        fn tags_are_trimmed_and_deduplicated() {
            let tags = vec!["rust".to_string()];
            assert_eq!(add_tag(&tags, " rust "), tags);
            assert_eq!(add_tag(&tags, "   "), tags);
            assert_eq!(add_tag(&tags, " cli "), vec!["rust", "cli"]);
            assert_eq!(remove_tag(&["a".to_string(), "b".to_string()], "a"), vec!["b"]);
        }

        #[test]
        fn milestone_status_cycles_through_all_three() {
            let doc = plan_doc();
            let once = cycle_plan_milestone(&doc, 0).expect("cycle");
            let twice = cycle_plan_milestone(&once, 0).expect("cycle");
            let thrice = cycle_plan_milestone(&twice, 0).expect("cycle");
            let status = |d: &Document| match &d.header {
                Header::Plan(p) => p.milestones[0].status,
                Header::Chat(_) => unreachable!(),
            };
            assert_eq!(status(&once), MilestoneStatus::InProgress);
            assert_eq!(status(&twice), MilestoneStatus::Completed);
            assert_eq!(status(&thrice), MilestoneStatus::NotStarted);
        }

        #[test]
        fn action_items_only_on_chats() {
            assert_eq!(
                toggle_chat_action_item(&plan_doc(), 0),
                Err(EditError::WrongKind { expected: "chat" })
            );
            let chat = Document {
                kind: DocKind::Chat,
                filename: "c.mdx".into(),
                header: Header::Chat(ChatHeader {
                    title: "C".into(),
                    date: NaiveDate::from_ymd_opt(2026, 1, 1).expect("date"),
                    tags: vec![],
                    tldr: None,
                    action_items: vec![ActionItem {
                        task: "reply".into(),
                        done: false,
                    }],
                }),
                body: String::new(),
                fields: Fields::new(),
            };
            let toggled = toggle_chat_action_item(&chat, 0).expect("toggle");
            match toggled.header {
                Header::Chat(c) => assert!(c.action_items[0].done),
                Header::Plan(_) => unreachable!(),
            }
        }

        #[test]
        fn checklist_toggle_stays_inside_one_section() {
            let secs = vec![
                Section::new(2, "A", "- [ ] same").expect("section"),
                Section::new(2, "B", "- [ ] same").expect("section"),
            ];
            let out = toggle_checklist(&secs, 1, "- [ ] same").expect("toggle");
            assert_eq!(out[0].content, "- [ ] same");
            assert_eq!(out[1].content, "- [x] same");
        }

        #[test]
        fn document_edits_rebuild_body_and_header() {
            let doc = plan_doc();
            let (intro, secs) = doc.sections();
            let secs = toggle_checklist(&secs, 0, "- [ ] ship").expect("toggle");
            let edited = replace_sections(&doc, &intro, &secs);
            assert_eq!(edited.body, "## Goals\n\n- [x] ship");
            assert_eq!(toggle_body_checklist(&edited, "- [x] ship").body, doc.body);

            let tagged = retag(&doc, add_tag(doc.header.tags(), "systems"));
            assert_eq!(tagged.header.tags(), ["lang", "systems"]);
        }
    }
}

pub mod storage {
    //! Filesystem store. One directory per document kind under a root; every document is a
    //! single `.mdx` file rewritten wholesale on save.

    use crate::core::{DocKind, Document, FieldValue, Fields};
    use crate::frontmatter::{FrontmatterError, decode_listing, listing_list, parse_document};
    use crate::serialize::assemble_document;
    use serde::{Deserialize, Serialize};
    use std::{
        fs, io,
        path::{Path, PathBuf},
    };
    use tracing::{debug, warn};

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("invalid filename {0:?}")]
        InvalidFilename(String),
        #[error("missing required field `{0}`")]
        MissingField(String),
        #[error("{kind} {filename:?} not found")]
        NotFound { kind: DocKind, filename: String },
        #[error("i/o error on {path:?}")]
        Io {
            path: PathBuf,
            #[source]
            source: io::Error,
        },
        #[error(transparent)]
        Frontmatter(#[from] FrontmatterError),
    }

    /// `^[\w.-]+\.mdx$` over ASCII word characters, with no `..` anywhere.
    pub fn is_safe_filename(name: &str) -> bool {
        let Some(stem) = name.strip_suffix(".mdx") else {
            return false;
        };
        !stem.is_empty()
            && !name.contains("..")
            && stem
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    }

    /// Listing row, read with the best-effort decoder.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DocumentSummary {
        pub filename: String,
        pub title: String,
        pub date: String,
        #[serde(default)]
        pub tags: Vec<String>,
        pub tldr: Option<String>,
    }

    impl DocumentSummary {
        fn from_text(filename: &str, text: &str) -> Self {
            let mut listing = decode_listing(text);
            let title = listing
                .shift_remove("title")
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| filename.trim_end_matches(".mdx").to_string());
            Self {
                filename: filename.to_string(),
                title,
                date: listing.shift_remove("date").unwrap_or_default(),
                tags: listing
                    .get("tags")
                    .map(|raw| listing_list(raw))
                    .unwrap_or_default(),
                tldr: listing.shift_remove("tldr").filter(|t| !t.is_empty()),
            }
        }
    }

    /// Full replacement of one existing document.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct WriteRequest {
        pub kind: DocKind,
        pub filename: String,
        pub fields: Fields,
        pub body: String,
    }

    impl WriteRequest {
        pub fn from_document(doc: &Document) -> Self {
            Self {
                kind: doc.kind,
                filename: doc.filename.clone(),
                fields: doc.merged_fields(),
                body: doc.body.clone(),
            }
        }

        /// Boundary checks that do not touch the disk.
        fn validate(&self) -> Result<(), StoreError> {
            if !is_safe_filename(&self.filename) {
                return Err(StoreError::InvalidFilename(self.filename.clone()));
            }
            match self.fields.get("title") {
                Some(FieldValue::Str(t)) if !t.trim().is_empty() => Ok(()),
                _ => Err(StoreError::MissingField("title".into())),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StoreConfig {
        pub root: PathBuf,
    }

    impl Default for StoreConfig {
        fn default() -> Self {
            Self {
                root: PathBuf::from("."),
            }
        }
    }

    pub trait DocumentRepository {
        /// Summaries of one collection, newest first.
        fn list(&self, kind: DocKind) -> Result<Vec<DocumentSummary>, StoreError>;

        /// Read and decode one document with the authoritative decoder.
        fn read(&self, kind: DocKind, filename: &str) -> Result<Document, StoreError>;

        /// Replace an existing document's content. Never creates files.
        fn write(&self, request: &WriteRequest) -> Result<(), StoreError>;

        fn save_document(&self, doc: &Document) -> Result<(), StoreError> {
            self.write(&WriteRequest::from_document(doc))
        }
    }

    #[derive(Debug, Clone)]
    pub struct FsDocumentStore {
        root: PathBuf,
    }

    impl FsDocumentStore {
        pub fn new(config: &StoreConfig) -> Self {
            Self {
                root: config.root.clone(),
            }
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        pub fn collection_dir(&self, kind: DocKind) -> PathBuf {
            self.root.join(kind.dir_name())
        }

        fn existing_path(&self, kind: DocKind, filename: &str) -> Result<PathBuf, StoreError> {
            if !is_safe_filename(filename) {
                return Err(StoreError::InvalidFilename(filename.to_string()));
            }
            let path = self.collection_dir(kind).join(filename);
            if !path.is_file() {
                return Err(StoreError::NotFound {
                    kind,
                    filename: filename.to_string(),
                });
            }
            Ok(path)
        }
    }

    fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    impl DocumentRepository for FsDocumentStore {
        fn list(&self, kind: DocKind) -> Result<Vec<DocumentSummary>, StoreError> {
            let dir = self.collection_dir(kind);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(dir = %dir.display(), "collection directory missing; listing empty");
                    return Ok(vec![]);
                }
                Err(e) => return Err(io_error(&dir)(e)),
            };

            let mut out = Vec::new();
            for entry in entries {
                let entry = entry.map_err(io_error(&dir))?;
                let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if !is_safe_filename(&filename) {
                    continue;
                }
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match fs::read_to_string(&path) {
                    Ok(text) => out.push(DocumentSummary::from_text(&filename, &text)),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable document"),
                }
            }
            out.sort_by(|a, b| {
                b.date
                    .cmp(&a.date)
                    .then_with(|| a.filename.cmp(&b.filename))
            });
            debug!(kind = %kind, count = out.len(), "listed collection");
            Ok(out)
        }

        fn read(&self, kind: DocKind, filename: &str) -> Result<Document, StoreError> {
            let path = self.existing_path(kind, filename)?;
            let text = fs::read_to_string(&path).map_err(io_error(&path))?;
            debug!(path = %path.display(), bytes = text.len(), "read document");
            Ok(parse_document(kind, filename, &text)?)
        }

        fn write(&self, request: &WriteRequest) -> Result<(), StoreError> {
            request.validate()?;
            let path = self.existing_path(request.kind, &request.filename)?;
            let text = assemble_document(&request.fields, &request.body);
            fs::write(&path, &text).map_err(io_error(&path))?;
            debug!(path = %path.display(), bytes = text.len(), "wrote document");
            Ok(())
        }
    }

}

pub use crate::core::{Block, DocKind, Document, Fields, FieldValue, Header, Message, Section};
pub use frontmatter::{decode, decode_listing, encode, parse_document};
pub use segment::{segment_messages, segment_sections};
pub use serialize::{assemble_document, sections_to_body, toggle_checklist_line};
pub use storage::{DocumentRepository, FsDocumentStore, StoreConfig, StoreError, is_safe_filename};
