use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use folio::core::{DocKind, Document, Header};
use folio::edit;
use folio::render::{RenderedBody, display_blocks, nest_sections, render_body};
use folio::segment::{MessageSplitter, SectionSplitter};
use folio::storage::{DocumentRepository, FsDocumentStore, StoreConfig, WriteRequest};
use folio::Fields;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    about = "Read and edit chat and plan documents",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Store root holding the `chats/` and `plans/` collections.
    #[arg(long, global = true, env = "FOLIO_ROOT", default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List a collection, newest first.
    List(ListArgs),

    /// Print a document's header and rendered body.
    Show(ShowArgs),

    /// Print the intro and the nested section outline with section indices.
    Sections(DocArgs),

    /// Replace an existing document from flat JSON fields and a body file.
    Write(WriteArgs),

    /// Toggle a checklist line, then save.
    Toggle(ToggleArgs),

    /// Add or remove a tag, then save.
    Tag(TagArgs),

    /// Cycle a plan milestone's status, then save.
    Milestone(IndexArgs),

    /// Toggle a chat action item, then save.
    Action(IndexArgs),

    /// Decode and re-assemble a document in canonical form.
    Format(FormatArgs),
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindArg {
    Chat,
    Plan,
}

impl From<KindArg> for DocKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Chat => DocKind::Chat,
            KindArg::Plan => DocKind::Plan,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TagOp {
    Add,
    Remove,
}

#[derive(Debug, Args)]
struct DocArgs {
    /// Document collection.
    #[arg(value_enum)]
    kind: KindArg,
    /// File name inside the collection, e.g. `2026-02-25-rust.mdx`.
    file: String,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(value_enum)]
    kind: KindArg,
    /// Emit JSON instead of a human-readable list.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[command(flatten)]
    doc: DocArgs,
    /// Emit JSON instead of terminal text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct WriteArgs {
    #[command(flatten)]
    doc: DocArgs,
    /// Header fields as a flat JSON object, written in the given order.
    #[arg(long)]
    fields: String,
    /// File holding the new body text.
    #[arg(long)]
    body: PathBuf,
}

#[derive(Debug, Args)]
struct ToggleArgs {
    #[command(flatten)]
    doc: DocArgs,
    /// Checklist line to toggle, matched by trimmed text.
    line: String,
    /// Restrict the toggle to one section (index from `folio sections`).
    #[arg(long)]
    section: Option<usize>,
}

#[derive(Debug, Args)]
struct TagArgs {
    #[command(flatten)]
    doc: DocArgs,
    #[arg(value_enum)]
    op: TagOp,
    tag: String,
}

#[derive(Debug, Args)]
struct IndexArgs {
    file: String,
    /// Zero-based position in the header list.
    index: usize,
}

#[derive(Debug, Args)]
struct FormatArgs {
    #[command(flatten)]
    doc: DocArgs,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let store = FsDocumentStore::new(&StoreConfig { root: cli.root });
    debug!(root = %store.root().display(), "opened store");
    match cli.command {
        Commands::List(args) => handle_list(&store, args),
        Commands::Show(args) => handle_show(&store, args),
        Commands::Sections(args) => handle_sections(&store, args),
        Commands::Write(args) => handle_write(&store, args),
        Commands::Toggle(args) => handle_toggle(&store, args),
        Commands::Tag(args) => handle_tag(&store, args),
        Commands::Milestone(args) => handle_milestone(&store, args),
        Commands::Action(args) => handle_action(&store, args),
        Commands::Format(args) => handle_format(&store, args),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let _ = tracing_subscriber::registry()
        .with(level)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn read_doc(store: &FsDocumentStore, kind: DocKind, file: &str) -> Result<Document> {
    store
        .read(kind, file)
        .with_context(|| format!("reading {kind} {file:?}"))
}

fn save_doc(store: &FsDocumentStore, doc: &Document) -> Result<()> {
    store
        .save_document(doc)
        .with_context(|| format!("saving {} {:?}", doc.kind, doc.filename))
}

fn handle_list(store: &FsDocumentStore, args: ListArgs) -> Result<()> {
    let kind = DocKind::from(args.kind);
    let summaries = store
        .list(kind)
        .with_context(|| format!("listing {:?}", store.collection_dir(kind)))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    if summaries.is_empty() {
        eprintln!("No {kind} documents under {:?}.", store.collection_dir(kind));
        return Ok(());
    }
    for s in summaries {
        let date = if s.date.is_empty() { "-" } else { s.date.as_str() };
        let tags = if s.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", s.tags.join(", "))
        };
        println!("{:<10} {:<36} {}{}", date, s.filename, s.title, tags);
    }
    Ok(())
}

fn handle_show(store: &FsDocumentStore, args: ShowArgs) -> Result<()> {
    let ShowArgs { doc, json } = args;
    let doc = read_doc(store, doc.kind.into(), &doc.file)?;
    match doc.kind {
        DocKind::Chat => emit_rendered(&doc, render_body(&MessageSplitter, &doc.body), json),
        DocKind::Plan => emit_rendered(&doc, render_body(&SectionSplitter, &doc.body), json),
    }
}

fn emit_rendered<C: Serialize>(doc: &Document, body: RenderedBody<C>, json: bool) -> Result<()> {
    if json {
        #[derive(Serialize)]
        struct JsonOutput<'a, C> {
            filename: &'a str,
            header: &'a Header,
            body: RenderedBody<C>,
        }

        let payload = JsonOutput {
            filename: &doc.filename,
            header: &doc.header,
            body,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    print!("{}", describe_header(&doc.header));
    if !body.intro.is_empty() {
        println!();
        print!("{}", display_blocks(&body.intro));
    }
    for chunk in &body.chunks {
        println!();
        println!("== {} ==", chunk.label);
        print!("{}", display_blocks(&chunk.blocks));
    }
    Ok(())
}

fn describe_header(header: &Header) -> String {
    let mut out = format!("{}\n{}", header.title(), header.date());
    if !header.tags().is_empty() {
        out.push_str(&format!("  [{}]", header.tags().join(", ")));
    }
    out.push('\n');
    if let Some(tldr) = header.tldr() {
        out.push_str(&format!("tl;dr: {tldr}\n"));
    }
    match header {
        Header::Chat(chat) => {
            for (idx, item) in chat.action_items.iter().enumerate() {
                let mark = if item.done { "x" } else { " " };
                out.push_str(&format!("{idx:>3} [{mark}] {}\n", item.task));
            }
        }
        Header::Plan(plan) => {
            let meta: Vec<String> = [
                plan.icon.clone(),
                plan.duration.clone(),
                plan.difficulty.map(|d| d.as_str().to_string()),
            ]
            .into_iter()
            .flatten()
            .collect();
            if !meta.is_empty() {
                out.push_str(&meta.join(" · "));
                out.push('\n');
            }
            for (idx, m) in plan.milestones.iter().enumerate() {
                out.push_str(&format!(
                    "{idx:>3} {:<12} {} ({})\n",
                    m.status.as_str(),
                    m.title,
                    m.weeks
                ));
            }
        }
    }
    out
}

fn handle_sections(store: &FsDocumentStore, args: DocArgs) -> Result<()> {
    let doc = read_doc(store, args.kind.into(), &args.file)?;
    let (intro, sections) = doc.sections();
    if !intro.is_empty() {
        println!("{intro}");
        println!();
    }
    if sections.is_empty() {
        eprintln!("No sections in {:?}.", doc.filename);
        return Ok(());
    }
    // Groups keep body order, so a running counter matches the flat section index.
    let mut index = 0;
    for group in nest_sections(&sections) {
        println!("{index:>3}  {}", group.section.title);
        index += 1;
        for child in &group.children {
            println!("{index:>3}    {}", child.title);
            index += 1;
        }
    }
    Ok(())
}

/// Flat JSON object into ordered header fields.
fn parse_fields_json(raw: &str) -> Result<Fields> {
    serde_json::from_str(raw).context("parsing --fields as a flat JSON object")
}

fn handle_write(store: &FsDocumentStore, args: WriteArgs) -> Result<()> {
    let WriteArgs { doc, fields, body } = args;
    let kind = DocKind::from(doc.kind);
    let fields = parse_fields_json(&fields)?;
    let body = fs::read_to_string(&body).with_context(|| format!("reading {:?}", body))?;
    let request = WriteRequest {
        kind,
        filename: doc.file,
        fields,
        body,
    };
    store
        .write(&request)
        .with_context(|| format!("writing {kind} {:?}", request.filename))?;
    println!("Wrote {}/{}", kind.dir_name(), request.filename);
    Ok(())
}

fn handle_toggle(store: &FsDocumentStore, args: ToggleArgs) -> Result<()> {
    let ToggleArgs { doc, line, section } = args;
    let doc = read_doc(store, doc.kind.into(), &doc.file)?;
    let edited = match section {
        Some(index) => {
            let (intro, sections) = doc.sections();
            let sections = edit::toggle_checklist(&sections, index, &line)?;
            edit::replace_sections(&doc, &intro, &sections)
        }
        None => edit::toggle_body_checklist(&doc, &line),
    };
    if edited.body == doc.body {
        anyhow::bail!("no checklist line matching {:?} in {:?}", line, doc.filename);
    }
    save_doc(store, &edited)?;
    println!("Toggled {:?} in {}", line.trim(), doc.filename);
    Ok(())
}

fn handle_tag(store: &FsDocumentStore, args: TagArgs) -> Result<()> {
    let TagArgs { doc, op, tag } = args;
    let doc = read_doc(store, doc.kind.into(), &doc.file)?;
    let tags = match op {
        TagOp::Add => edit::add_tag(doc.header.tags(), &tag),
        TagOp::Remove => edit::remove_tag(doc.header.tags(), &tag),
    };
    let edited = edit::retag(&doc, tags);
    save_doc(store, &edited)?;
    println!("{}: [{}]", doc.filename, edited.header.tags().join(", "));
    Ok(())
}

fn handle_milestone(store: &FsDocumentStore, args: IndexArgs) -> Result<()> {
    let doc = read_doc(store, DocKind::Plan, &args.file)?;
    let edited = edit::cycle_plan_milestone(&doc, args.index)
        .with_context(|| format!("cycling milestone {} of {:?}", args.index, args.file))?;
    save_doc(store, &edited)?;
    if let Header::Plan(plan) = &edited.header {
        let m = &plan.milestones[args.index];
        println!("{} -> {}", m.title, m.status.as_str());
    }
    Ok(())
}

fn handle_action(store: &FsDocumentStore, args: IndexArgs) -> Result<()> {
    let doc = read_doc(store, DocKind::Chat, &args.file)?;
    let edited = edit::toggle_chat_action_item(&doc, args.index)
        .with_context(|| format!("toggling action item {} of {:?}", args.index, args.file))?;
    save_doc(store, &edited)?;
    if let Header::Chat(chat) = &edited.header {
        let item = &chat.action_items[args.index];
        let mark = if item.done { "x" } else { " " };
        println!("[{mark}] {}", item.task);
    }
    Ok(())
}

fn handle_format(store: &FsDocumentStore, args: FormatArgs) -> Result<()> {
    let FormatArgs { doc, in_place } = args;
    let doc = read_doc(store, doc.kind.into(), &doc.file)?;
    if in_place {
        save_doc(store, &doc)?;
    } else {
        print!("{}", doc.to_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio::FieldValue;

    const PLAN: &str = "---\ntitle: \"Learn Rust\"\ndate: \"2026-02-25\"\ntags: [\"lang\"]\nmilestones:\n  - title: \"Basics\"\n    weeks: \"1-2\"\n    status: \"not-started\"\n---\n\nIntro\n\n## Goals\n\n- [ ] ship\n\n## Later\n\n- [ ] ship\n";

    fn seeded_store() -> (tempfile::TempDir, FsDocumentStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let plans = tmp.path().join("plans");
        fs::create_dir_all(&plans).expect("mkdir plans");
        fs::write(plans.join("rust.mdx"), PLAN).expect("seed plan");
        let store = FsDocumentStore::new(&StoreConfig {
            root: tmp.path().to_path_buf(),
        });
        (tmp, store)
    }

    fn doc_args(file: &str) -> DocArgs {
        DocArgs {
            kind: KindArg::Plan,
            file: file.into(),
        }
    }

    #[test]
    fn cli_parses_global_root_after_subcommand() {
        let cli = Cli::try_parse_from([
            "folio", "tag", "plan", "a.mdx", "add", "rust", "--root", "/tmp/docs",
        ])
        .expect("parse");
        assert_eq!(cli.root, PathBuf::from("/tmp/docs"));
        assert!(matches!(
            cli.command,
            Commands::Tag(TagArgs {
                op: TagOp::Add,
                ..
            })
        ));
    }

    #[test]
    fn fields_json_keeps_order_and_types() {
        let fields =
            parse_fields_json(r#"{"title": "T", "tags": ["a"], "draft": true, "weeks": 4}"#)
                .expect("fields");
        let keys: Vec<_> = fields.keys().map(String::as_str).collect();
        assert_eq!(keys, ["title", "tags", "draft", "weeks"]);
        assert_eq!(fields["draft"], FieldValue::Bool(true));
        assert_eq!(fields["weeks"], FieldValue::Number(4.0));
        assert!(parse_fields_json(r#"{"nested": {"a": 1}}"#).is_err());
    }

    #[test]
    fn write_command_replaces_document() {
        let (tmp, store) = seeded_store();
        let body = tmp.path().join("body.md");
        fs::write(&body, "\nNew body\n\n").expect("body");
        handle_write(
            &store,
            WriteArgs {
                doc: doc_args("rust.mdx"),
                fields: r#"{"title": "Renamed", "date": "2026-03-01"}"#.into(),
                body,
            },
        )
        .expect("write");
        let text = fs::read_to_string(tmp.path().join("plans/rust.mdx")).expect("read");
        assert_eq!(
            text,
            "---\ntitle: \"Renamed\"\ndate: \"2026-03-01\"\n---\n\nNew body\n"
        );
    }

    #[test]
    fn write_command_refuses_missing_files() {
        let (tmp, store) = seeded_store();
        let body = tmp.path().join("body.md");
        fs::write(&body, "x").expect("body");
        let err = handle_write(
            &store,
            WriteArgs {
                doc: doc_args("ghost.mdx"),
                fields: r#"{"title": "T"}"#.into(),
                body,
            },
        );
        assert!(err.is_err());
        assert!(!tmp.path().join("plans/ghost.mdx").exists());
    }

    #[test]
    fn section_toggle_touches_only_that_section() {
        let (_tmp, store) = seeded_store();
        handle_toggle(
            &store,
            ToggleArgs {
                doc: doc_args("rust.mdx"),
                line: "- [ ] ship".into(),
                section: Some(1),
            },
        )
        .expect("toggle");
        let doc = store.read(DocKind::Plan, "rust.mdx").expect("read");
        assert_eq!(
            doc.body,
            "Intro\n\n## Goals\n\n- [ ] ship\n\n## Later\n\n- [x] ship\n"
        );
    }

    #[test]
    fn toggle_without_match_is_an_error() {
        let (_tmp, store) = seeded_store();
        let res = handle_toggle(
            &store,
            ToggleArgs {
                doc: doc_args("rust.mdx"),
                line: "- [ ] missing".into(),
                section: None,
            },
        );
        assert!(res.is_err());
    }

    #[test]
    fn tag_and_milestone_commands_save() {
        let (_tmp, store) = seeded_store();
        handle_tag(
            &store,
            TagArgs {
                doc: doc_args("rust.mdx"),
                op: TagOp::Add,
                tag: "systems".into(),
            },
        )
        .expect("tag");
        handle_milestone(
            &store,
            IndexArgs {
                file: "rust.mdx".into(),
                index: 0,
            },
        )
        .expect("milestone");
        let doc = store.read(DocKind::Plan, "rust.mdx").expect("read");
        assert_eq!(doc.header.tags(), ["lang", "systems"]);
        match doc.header {
            Header::Plan(plan) => assert_eq!(plan.milestones[0].status.as_str(), "in-progress"),
            Header::Chat(_) => panic!("expected a plan"),
        }
        assert!(
            handle_action(
                &store,
                IndexArgs {
                    file: "rust.mdx".into(),
                    index: 0
                }
            )
            .is_err()
        );
    }

    #[test]
    fn header_description_lists_milestones() {
        let (_tmp, store) = seeded_store();
        let doc = store.read(DocKind::Plan, "rust.mdx").expect("read");
        let text = describe_header(&doc.header);
        assert_eq!(
            text,
            "Learn Rust\n2026-02-25  [lang]\n  0 not-started  Basics (1-2)\n"
        );
    }
}
