/* GRAMMARS
Filename date prefix:
    YYYYMMDD_NN_rest.html   -> sort key ("YYYYMMDD", NN)
    YYYYMMDD_rest.html      -> sort key ("YYYYMMDD", 0)
    anything else           -> sort key ("00000000", 0)
The sort key never validates the calendar date. The display date does, and
falls back to the file's mtime when the prefix is missing or impossible
(e.g. 20259999), so the two can disagree for the same file.

Dialogue markdown (per line):
    # Heading                -> main title (first one wins)
    ## Heading               -> numbered chapter + TOC entry; an opening
                                "はじめに"/"introduction" chapter stays unnumbered
    ### Heading              -> sub heading
    > **Speaker**：「Quote」  -> dialogue block. Fullwidth colon and corner
                                quotes, that IS the dialect
    ---                      -> horizontal rule, unless the next line opens with
                                **【Title】**: then an annotation block runs
                                until the next ---
    **text** / *text*        -> strong
    - item / * item          -> list item, adjacent items merge into one list

Registries (all optional, all UTF-8, all inside the docs dir):
    ignore.txt      one filename per line, # comments
    tags.json       { "<filename>": ["<tag>", ...] }
    speakers.json   { "<speaker substring>": "<palette class>" }
*/
// TODO: recurse into subdirectories. Everything is depth 1 for now.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(unused)]

use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[macro_use]
extern crate lazy_static;

pub const MAIN_JS: &str = include_str!("main.js");
pub const STYLE_CSS: &str = include_str!("style.css");
pub const DOC_CSS: &str = include_str!("doc_style.css");
pub const HTML_HEADER: &str = include_str!("html/header.html");
pub const HTML_FOOTER: &str = include_str!("html/footer.html");
pub const DOC_HEADER: &str = include_str!("html/doc_header.html");
pub const DOC_FOOTER: &str = include_str!("html/doc_footer.html");

pub struct CommandLineArguments {
    _args: Vec<String>,
    pub md_files: Vec<String>,
    pub config: IndexConfig,
}

impl CommandLineArguments {
    pub fn new() -> CommandLineArguments {
        let args: Vec<String> = env::args().collect();
        let mut md_files: Vec<String> = Vec::new();
        let mut config = IndexConfig::new();

        let mut i = 1;
        while (i < args.len()) {
            let a = &args[i];
            if (a == "--docs-dir" && i + 1 < args.len()) {
                config.docs_dir = args[i + 1].to_owned();
                i += 1;
            } else if (a == "--output" && i + 1 < args.len()) {
                config.output_file = args[i + 1].to_owned();
                i += 1;
            } else if (a == "--base-url" && i + 1 < args.len()) {
                config.base_url = args[i + 1].to_owned();
                i += 1;
            } else if (a == "--title" && i + 1 < args.len()) {
                config.site_title = args[i + 1].to_owned();
                i += 1;
            } else if (a.to_lowercase().ends_with(".md")) {
                md_files.push(a.to_owned());
            }
            i += 1;
        }

        CommandLineArguments {
            _args: args,
            md_files,
            config,
        }
    }
}

/// Run configuration with its defaults. One of these is built from the
/// command line and handed through the whole pipeline; nothing reads paths
/// from anywhere else.
pub struct IndexConfig {
    /// Flat directory scanned for *.html documents. Default "docs".
    pub docs_dir: String,
    /// Listing output path, overwritten every run. Default "index.html".
    pub output_file: String,
    /// Prefix for the canonical copy-link URL, trailing slash expected.
    /// Default "" (the page script resolves the relative URL itself).
    pub base_url: String,
    /// Listing page heading. Default "Documentation".
    pub site_title: String,
    /// Ignore registry filename inside docs_dir. Default "ignore.txt".
    pub ignore_file: String,
    /// Tag registry filename inside docs_dir. Default "tags.json".
    pub tag_file: String,
    /// Speaker registry filename inside docs_dir. Default "speakers.json".
    pub speaker_file: String,
}

impl IndexConfig {
    pub fn new() -> IndexConfig {
        IndexConfig {
            docs_dir: "docs".to_owned(),
            output_file: "index.html".to_owned(),
            base_url: String::new(),
            site_title: "Documentation".to_owned(),
            ignore_file: "ignore.txt".to_owned(),
            tag_file: "tags.json".to_owned(),
            speaker_file: "speakers.json".to_owned(),
        }
    }

    pub fn ignore_path(&self) -> PathBuf {
        Path::new(&self.docs_dir).join(&self.ignore_file)
    }

    pub fn tag_path(&self) -> PathBuf {
        Path::new(&self.docs_dir).join(&self.tag_file)
    }

    pub fn speaker_path(&self) -> PathBuf {
        Path::new(&self.docs_dir).join(&self.speaker_file)
    }
}

/// Tag registry: filename -> ordered tags, straight from tags.json.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct TAG_REGISTRY {
    pub tags: HashMap<String, Vec<String>>,
}

#[derive(PartialEq, Eq, Hash)]
enum REGEX_NAME {
    date_prefix,
    sort_key,
    title_tag,
    heading_tag,
    inner_markup,
    dialogue_line,
    annotation_open,
    annotation_title,
    annotation_strip,
    emphasis_strong,
    emphasis_single,
    list_item,
    blank_run,
    adjacent_lists,
    toc_chapter_prefix,
}

lazy_static! {
    static ref REGEX_HASHMAP: HashMap<REGEX_NAME, Regex> = {
        let mut m = HashMap::new();
        m.insert(REGEX_NAME::date_prefix, Regex::new(r"^\d{8}").unwrap());
        m.insert(
            REGEX_NAME::sort_key,
            Regex::new(r"^(\d{8})(?:_(\d{2}))?").unwrap(),
        );
        m.insert(
            REGEX_NAME::title_tag,
            Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap(),
        );
        m.insert(
            REGEX_NAME::heading_tag,
            Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap(),
        );
        m.insert(
            REGEX_NAME::inner_markup,
            Regex::new(r"(?s)<[^>]*>").unwrap(),
        );
        m.insert(
            REGEX_NAME::dialogue_line,
            Regex::new(r"^>\s\*\*(.+?)\*\*：「(.+?)」").unwrap(),
        );
        m.insert(
            REGEX_NAME::annotation_open,
            Regex::new(r"^\*\*【.+?】\*\*").unwrap(),
        );
        m.insert(
            REGEX_NAME::annotation_title,
            Regex::new(r"(?s)\*\*【(.+?)】\*\*").unwrap(),
        );
        m.insert(
            REGEX_NAME::annotation_strip,
            Regex::new(r"\*\*【.+?】\*\*\n*").unwrap(),
        );
        m.insert(
            REGEX_NAME::emphasis_strong,
            Regex::new(r"\*\*(.+?)\*\*").unwrap(),
        );
        m.insert(
            REGEX_NAME::emphasis_single,
            Regex::new(r"\*(.+?)\*").unwrap(),
        );
        m.insert(REGEX_NAME::list_item, Regex::new(r"^[*-] ").unwrap());
        m.insert(REGEX_NAME::blank_run, Regex::new(r"\n\s*\n").unwrap());
        m.insert(
            REGEX_NAME::adjacent_lists,
            Regex::new(r"</ul>\s*<ul>").unwrap(),
        );
        m.insert(
            REGEX_NAME::toc_chapter_prefix,
            Regex::new(r"第\d+章:\s*").unwrap(),
        );
        m
    };
}

pub fn escape_html(text: &str) -> String {
    text.replace("&", "&amp;")
        .replace("<", "&lt;")
        .replace(">", "&gt;")
        .replace(r##"""##, "&quot;")
        .replace("'", "&apos;")
}

pub fn file_stem(filename: &str) -> String {
    match filename.rfind('.') {
        Some(i) => filename[..i].to_owned(),
        None => filename.to_owned(),
    }
}

/// Ordering key from the filename date prefix. No calendar validation:
/// 20259999 sorts exactly where its digits put it.
pub fn sort_key(filename: &str) -> (String, u32) {
    if let Some(c) = REGEX_HASHMAP[&REGEX_NAME::sort_key].captures(filename) {
        let date = c.get(1).unwrap().as_str().to_owned();
        let seq = match c.get(2) {
            Some(s) => s.as_str().parse::<u32>().unwrap_or(0),
            None => 0,
        };
        return (date, seq);
    }
    ("00000000".to_owned(), 0)
}

/// Display date, YYYY-MM-DD. The filename prefix wins when it parses as a
/// real calendar date; mtimes lie after a checkout or copy, so they are the
/// fallback, not the source.
pub fn display_date(path: &Path, filename: &str) -> String {
    if let Some(m) = REGEX_HASHMAP[&REGEX_NAME::date_prefix].find(filename) {
        if let Ok(d) = NaiveDate::parse_from_str(m.as_str(), "%Y%m%d") {
            return d.format("%Y-%m-%d").to_string();
        }
    }
    let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => std::time::UNIX_EPOCH,
    };
    DateTime::<Local>::from(mtime).format("%Y-%m-%d").to_string()
}

#[derive(Clone)]
pub struct DOC {
    _path: String,
    _filename: String,
    _title: String,
    _date: String,
    _sort_key: (String, u32),
    _tags: Vec<String>,
}

impl DOC {
    pub fn new() -> Self {
        Self {
            _path: String::new(),
            _filename: String::new(),
            _title: String::new(),
            _date: String::new(),
            _sort_key: ("00000000".to_owned(), 0),
            _tags: Vec::new(),
        }
    }

    pub fn set_path(self, path: impl Into<String>) -> Self {
        Self {
            _path: path.into(),
            _filename: self._filename,
            _title: self._title,
            _date: self._date,
            _sort_key: self._sort_key,
            _tags: self._tags,
        }
    }

    pub fn set_filename(self, filename: impl Into<String>) -> Self {
        Self {
            _path: self._path,
            _filename: filename.into(),
            _title: self._title,
            _date: self._date,
            _sort_key: self._sort_key,
            _tags: self._tags,
        }
    }

    pub fn resolve_sort_key(self) -> Self {
        let key = sort_key(&self._filename);
        Self {
            _path: self._path,
            _filename: self._filename,
            _title: self._title,
            _date: self._date,
            _sort_key: key,
            _tags: self._tags,
        }
    }

    pub fn resolve_date(self) -> Self {
        let date = display_date(Path::new(&self._path), &self._filename);
        Self {
            _path: self._path,
            _filename: self._filename,
            _title: self._title,
            _date: date,
            _sort_key: self._sort_key,
            _tags: self._tags,
        }
    }

    // Title precedence is fixed: <title> content, else the first <h1> with
    // its inner markup stripped, else the filename stem. Never fails: an
    // unreadable file just gets the stem.
    pub fn parse_title(self) -> Self {
        let mut title = String::new();
        if let Ok(contents) = fs::read_to_string(&self._path) {
            if let Some(c) = REGEX_HASHMAP[&REGEX_NAME::title_tag].captures(&contents) {
                title = c.get(1).map_or("", |m| m.as_str()).trim().to_owned();
            }
            if (title.is_empty()) {
                if let Some(c) = REGEX_HASHMAP[&REGEX_NAME::heading_tag].captures(&contents) {
                    title = REGEX_HASHMAP[&REGEX_NAME::inner_markup]
                        .replace_all(c.get(1).map_or("", |m| m.as_str()), "")
                        .trim()
                        .to_owned();
                }
            }
        }
        if (title.is_empty()) {
            title = file_stem(&self._filename);
        }
        Self {
            _path: self._path,
            _filename: self._filename,
            _title: title,
            _date: self._date,
            _sort_key: self._sort_key,
            _tags: self._tags,
        }
    }

    pub fn attach_tags(self, tags: Vec<String>) -> Self {
        Self {
            _path: self._path,
            _filename: self._filename,
            _title: self._title,
            _date: self._date,
            _sort_key: self._sort_key,
            _tags: tags,
        }
    }

    pub fn get_path(&self) -> String {
        self._path.to_owned()
    }

    pub fn get_filename(&self) -> String {
        self._filename.to_owned()
    }

    pub fn get_title(&self) -> String {
        self._title.to_owned()
    }

    pub fn get_date(&self) -> String {
        self._date.to_owned()
    }

    pub fn get_sort_key(&self) -> (String, u32) {
        self._sort_key.to_owned()
    }

    pub fn get_tags(&self) -> Vec<String> {
        self._tags.to_owned()
    }

    /// The sort key as embedded in the listing: "YYYYMMDD_NN".
    pub fn sort_key_string(&self) -> String {
        format!("{}_{:02}", self._sort_key.0, self._sort_key.1)
    }
}

fn join_name(stem: &str, ext: &str) -> String {
    if (ext.is_empty()) {
        stem.to_owned()
    } else {
        format!("{}.{}", stem, ext)
    }
}

/// First free name for `stem.ext` inside `dir`, scanning stem-1, stem-2, ...
/// upward. Public on its own so the same-second rename path has a direct
/// test instead of a wall-clock race.
pub fn resolve_collision(dir: &Path, stem: &str, ext: &str) -> String {
    let mut candidate = join_name(stem, ext);
    let mut n = 0u32;
    while (dir.join(&candidate).exists()) {
        n += 1;
        candidate = join_name(format!("{}-{}", stem, n).as_str(), ext);
    }
    candidate
}

/// Rename `filename` inside `dir` when its stem is not pure ASCII. Returns
/// `None` when no rename is needed (and touches nothing), otherwise performs
/// the rename and returns the (old, new) pair for logging. Filesystem errors
/// go back to the caller.
pub fn sanitize_filename(dir: &Path, filename: &str) -> std::io::Result<Option<(String, String)>> {
    let stem = file_stem(filename);
    if (stem.is_ascii()) {
        return Ok(None);
    }
    let ext = match filename.rfind('.') {
        Some(i) => filename[i + 1..].to_owned(),
        None => String::new(),
    };
    let fresh_stem = format!("doc-{}", Local::now().format("%Y%m%d%H%M%S"));
    let fresh = resolve_collision(dir, &fresh_stem, &ext);
    fs::rename(dir.join(filename), dir.join(&fresh))?;
    Ok(Some((filename.to_owned(), fresh)))
}

/// The precondition pass: every file in the scan directory gets an ASCII
/// stem before any metadata extraction runs. A missing directory is fine.
pub fn sanitize_directory(cfg: &IndexConfig) -> std::io::Result<Vec<(String, String)>> {
    let mut renamed: Vec<(String, String)> = Vec::new();
    let dir = Path::new(&cfg.docs_dir);
    if (!dir.is_dir()) {
        return Ok(renamed);
    }

    let mut names: Vec<String> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if (entry.file_type().is_file()) {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();

    for name in names {
        if let Some(pair) = sanitize_filename(dir, &name)? {
            renamed.push(pair);
        }
    }
    Ok(renamed)
}

/// Ignore registry: one filename per line, # comments, whitespace trimmed.
/// A missing file excludes nothing.
pub fn load_ignore_list(path: &Path) -> HashSet<String> {
    let mut out: HashSet<String> = HashSet::new();
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return out,
    };
    for line in contents.lines() {
        let line = line.trim();
        if (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        out.insert(line.to_owned());
    }
    out
}

/// Tag registry from tags.json. A missing file means no tags; a file that is
/// there but does not parse kills the run before any output is produced.
pub fn load_tag_registry(path: &Path) -> TAG_REGISTRY {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return TAG_REGISTRY::default(),
    };
    serde_json::from_str(&contents)
        .expect(format!("Unable to parse tag registry {}", path.display()).as_str())
}

/// Speaker registry for the converter, same contract as the tag registry.
pub fn load_speaker_map(path: &Path) -> HashMap<String, String> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return HashMap::new(),
    };
    serde_json::from_str(&contents)
        .expect(format!("Unable to parse speaker registry {}", path.display()).as_str())
}

/// Every tag any document carries, deduplicated and sorted. Drives the
/// filter buttons.
pub fn all_tags(registry: &TAG_REGISTRY) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tags in registry.tags.values() {
        for t in tags {
            if (!out.contains(t)) {
                out.push(t.to_owned());
            }
        }
    }
    out.sort();
    out
}

/// Post-rename scan of the docs dir. Enumeration is lexicographic by
/// filename so reruns walk the files identically; the order of sort-key
/// ties falls out of that and is not a contract.
pub fn collect_docs(
    cfg: &IndexConfig,
    ignore: &HashSet<String>,
    registry: &TAG_REGISTRY,
) -> Vec<DOC> {
    let mut out: Vec<DOC> = Vec::new();
    let docs_path = Path::new(&cfg.docs_dir);
    if (!docs_path.is_dir()) {
        return out;
    }

    let mut names: Vec<(String, String)> = Vec::new();
    for entry in WalkDir::new(docs_path).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if (!entry.file_type().is_file()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if (name.to_lowercase().ends_with(".html")) {
            names.push((name, entry.path().display().to_string()));
        }
    }
    names.sort();

    for (name, path) in names {
        if (ignore.contains(&name)) {
            continue;
        }
        let doc_tags = match registry.tags.get(&name) {
            Some(t) => t.to_owned(),
            None => Vec::new(),
        };
        let doc = DOC::new()
            .set_path(path)
            .set_filename(&name)
            .resolve_sort_key()
            .resolve_date()
            .parse_title()
            .attach_tags(doc_tags);
        out.push(doc);
    }

    // Newest date first, highest sequence first within a date. The sort is
    // stable, so ties keep the scan order.
    out.sort_by(|a, b| b._sort_key.cmp(&a._sort_key));
    out
}

/// The listing page. Every row carries the metadata the page script
/// re-sorts and filters on, so none of that ever comes back through here.
pub fn generate_listing(docs: &Vec<DOC>, known_tags: &Vec<String>, cfg: &IndexConfig) -> String {
    let mut rows = String::new();
    if (docs.is_empty()) {
        rows.push_str("                    <li class=\"no-docs\">No documents yet</li>\n");
    } else {
        for d in docs {
            let mut badges = String::new();
            for t in d.get_tags() {
                badges.push_str(
                    format!(r#"<span class="doc-tag">{}</span>"#, escape_html(&t)).as_str(),
                );
            }
            let href = format!("{}/{}", cfg.docs_dir, d.get_filename());
            let url = format!("{}{}", cfg.base_url, href);
            rows.push_str(
                format!(
                    r#"                    <li class="doc-item" data-filename="{}" data-sortkey="{}" data-tags="{}">
                        <a href="{}" class="doc-link">
                            <span class="doc-title">{}</span>
                            <span class="doc-tags">{}</span>
                            <span class="doc-date">{}</span>
                        </a>
                        <button class="copy-link" data-url="{}" title="Copy link">&#128279;</button>
                    </li>
"#,
                    escape_html(&d.get_filename()),
                    d.sort_key_string(),
                    escape_html(&d.get_tags().join(",")),
                    escape_html(&href),
                    escape_html(&d.get_title()),
                    badges,
                    d.get_date(),
                    escape_html(&url),
                )
                .as_str(),
            );
        }
    }

    let mut filters = String::new();
    for t in known_tags {
        filters.push_str(
            format!(
                r#"<button class="tag-filter" data-tag="{}">{}</button>"#,
                escape_html(t),
                escape_html(t)
            )
            .as_str(),
        );
    }

    let header = HTML_HEADER
        .replace("{{site_title}}", escape_html(&cfg.site_title).as_str())
        .replace("{{count}}", docs.len().to_string().as_str())
        .replace("{{tag_filters}}", filters.as_str());
    let footer = HTML_FOOTER
        .replace(
            "{{updated}}",
            Local::now().format("%Y-%m-%d %H:%M").to_string().as_str(),
        )
        .replace("{{main_js}}", MAIN_JS);

    format!("{}{}{}", header, rows, footer)
}

/// Title-page metadata for a converted document, parsed from its preamble
/// (everything before the first chapter heading).
#[derive(Clone)]
pub struct DOC_META {
    pub title: String,
    pub main_title: String,
    pub sub_title: String,
    pub metadata: String,
}

impl DOC_META {
    pub fn new() -> DOC_META {
        DOC_META {
            title: String::new(),
            main_title: String::new(),
            sub_title: String::new(),
            metadata: String::new(),
        }
    }

    // First "# " heading -> main title. In the rest of the preamble, the
    // first **...** line is the metadata line and the first plain line is
    // the subtitle.
    pub fn parse(text: &str) -> DOC_META {
        let mut meta = DOC_META::new();
        for line in text.lines() {
            let l = line.trim();
            if (l.starts_with("## ")) {
                break;
            }
            if (l.starts_with("# ") && meta.main_title.is_empty()) {
                meta.main_title = l[2..].trim().to_owned();
                meta.title = meta.main_title.to_owned();
            } else if (l.is_empty() || l.starts_with('#') || l.starts_with('>') || l == "---") {
                continue;
            } else if (meta.main_title.is_empty()) {
                continue;
            } else if (l.starts_with("**") && meta.metadata.is_empty()) {
                meta.metadata = REGEX_HASHMAP[&REGEX_NAME::emphasis_strong]
                    .replace_all(l, "$1")
                    .to_string();
            } else if (meta.sub_title.is_empty() && !l.starts_with("**")) {
                meta.sub_title = l.to_owned();
            }
        }
        meta
    }
}

/// Palette class for a dialogue speaker, matched by substring against the
/// speaker registry. Unknown speakers all share the default palette.
pub fn speaker_class(speaker: &str, map: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for k in keys {
        if (speaker.contains(k.as_str())) {
            return map[k].to_owned();
        }
    }
    "blue".to_owned()
}

fn is_introduction(title: &str) -> bool {
    (title.contains("はじめに") || title.to_lowercase().contains("introduction"))
}

#[derive(Clone)]
pub struct DMD {
    _lines: Vec<String>,
    _html_lines: Vec<String>,
    _toc: Vec<(usize, String)>,
    _filename: String,
    _meta: DOC_META,
    _speakers: HashMap<String, String>,
}

impl DMD {
    pub fn new() -> Self {
        Self {
            _lines: Vec::new(),
            _html_lines: Vec::new(),
            _toc: Vec::new(),
            _filename: String::new(),
            _meta: DOC_META::new(),
            _speakers: HashMap::new(),
        }
    }

    pub fn set_filename(self, filename: impl Into<String>) -> Self {
        let mut str: String = filename.into();
        if (str.to_lowercase().ends_with(".md")) {
            str.pop();
            str.pop();
            str.pop();
        }
        Self {
            _lines: self._lines,
            _html_lines: self._html_lines,
            _toc: self._toc,
            _filename: str,
            _meta: self._meta,
            _speakers: self._speakers,
        }
    }

    pub fn set_meta(self, meta: DOC_META) -> Self {
        Self {
            _lines: self._lines,
            _html_lines: self._html_lines,
            _toc: self._toc,
            _filename: self._filename,
            _meta: meta,
            _speakers: self._speakers,
        }
    }

    pub fn set_speakers(self, speakers: HashMap<String, String>) -> Self {
        Self {
            _lines: self._lines,
            _html_lines: self._html_lines,
            _toc: self._toc,
            _filename: self._filename,
            _meta: self._meta,
            _speakers: speakers,
        }
    }

    // Collapses blank-line runs to one, then splits into lines for the
    // block pass.
    pub fn pre_scan(self, _text: impl Into<String>) -> Self {
        let text: String = _text.into();
        let collapsed = REGEX_HASHMAP[&REGEX_NAME::blank_run]
            .replace_all(&text, "\n\n")
            .to_string();
        let lines: Vec<String> = collapsed.split('\n').map(|l| l.to_owned()).collect();
        Self {
            _lines: lines,
            _html_lines: self._html_lines,
            _toc: self._toc,
            _filename: self._filename,
            _meta: self._meta,
            _speakers: self._speakers,
        }
    }

    pub fn parse_blocks(self) -> Self {
        let mut html: Vec<String> = Vec::new();
        let mut toc: Vec<(usize, String)> = Vec::new();
        let mut chapter_count: usize = 0;
        let mut in_annotation = false;
        // ! Warning: an annotation block that never sees its closing --- is
        // dropped, content and all.
        let mut annotation: Vec<String> = Vec::new();

        for i in 0..self._lines.len() {
            let stripped = self._lines[i].trim().to_owned();

            if (stripped == "---") {
                if (in_annotation) {
                    html.push(DMD::render_annotation(&annotation));
                    in_annotation = false;
                    annotation.clear();
                    continue;
                }
                if (i + 1 < self._lines.len()
                    && REGEX_HASHMAP[&REGEX_NAME::annotation_open]
                        .is_match(self._lines[i + 1].trim()))
                {
                    in_annotation = true;
                    continue;
                }
                html.push("<hr>".to_owned());
                continue;
            }

            if (in_annotation) {
                annotation.push(self._lines[i].to_owned());
                continue;
            }

            if (stripped.starts_with("## ")) {
                let title = stripped[3..].trim();
                if (chapter_count == 0 && is_introduction(title)) {
                    html.push(format!(
                        r##"<h2 id="introduction">{}</h2>"##,
                        escape_html(title)
                    ));
                } else {
                    chapter_count += 1;
                    toc.push((chapter_count, title.to_owned()));
                    html.push(format!(
                        r##"<h2 id="chapter{}">第{}章:{}</h2>"##,
                        chapter_count,
                        chapter_count,
                        escape_html(title)
                    ));
                }
            } else if (stripped.starts_with("### ")) {
                let title = stripped[4..].trim();
                html.push(format!("<h3>{}</h3>", escape_html(title)));
            } else if (REGEX_HASHMAP[&REGEX_NAME::dialogue_line].is_match(&stripped)) {
                let c = REGEX_HASHMAP[&REGEX_NAME::dialogue_line]
                    .captures(&stripped)
                    .unwrap();
                let speaker = c.get(1).map_or("", |m| m.as_str()).trim();
                let text = c.get(2).map_or("", |m| m.as_str()).trim();
                let class = speaker_class(speaker, &self._speakers);
                html.push(format!(
                    r##"<div class="dialogue {}">
    <div class="dialogue-speaker">{}</div>
    <p class="dialogue-text">「{}」</p>
</div>"##,
                    class,
                    escape_html(speaker),
                    escape_html(text)
                ));
            } else if (!stripped.is_empty()
                && !stripped.starts_with('#')
                && !stripped.starts_with('>'))
            {
                let text = REGEX_HASHMAP[&REGEX_NAME::emphasis_strong]
                    .replace_all(&stripped, "<strong>$1</strong>")
                    .to_string();
                let text = REGEX_HASHMAP[&REGEX_NAME::emphasis_single]
                    .replace_all(&text, "<strong>$1</strong>")
                    .to_string();
                if (REGEX_HASHMAP[&REGEX_NAME::list_item].is_match(&text)) {
                    html.push(format!("<ul><li>{}</li></ul>", text[2..].trim()));
                } else {
                    html.push(format!("<p>{}</p>", text));
                }
            }
        }

        Self {
            _lines: self._lines,
            _html_lines: html,
            _toc: toc,
            _filename: self._filename,
            _meta: self._meta,
            _speakers: self._speakers,
        }
    }

    fn render_annotation(annotation: &Vec<String>) -> String {
        let content_text = annotation.join("\n");
        let title = match REGEX_HASHMAP[&REGEX_NAME::annotation_title].captures(&content_text) {
            Some(c) => c.get(1).map_or("", |m| m.as_str()).trim().to_owned(),
            None => "注釈".to_owned(),
        };
        let body = REGEX_HASHMAP[&REGEX_NAME::annotation_strip]
            .replace(&content_text, "")
            .to_string();
        let mut paragraphs = String::new();
        for p in body.split("\n\n") {
            let p = p.trim();
            if (!p.is_empty()) {
                paragraphs.push_str(format!("<p>{}</p>", escape_html(p)).as_str());
            }
        }
        format!(
            r##"<div class="annotation">
    <div class="annotation-title">{}</div>
    <div class="annotation-content">
        {}
    </div>
</div>"##,
            escape_html(&title),
            paragraphs
        )
    }

    pub fn generate_doc_toc(&self) -> String {
        let mut out: String = r##"<div class="table-of-contents">
    <h2>目次</h2>
    <ol>"##
            .to_owned();
        for (n, t) in &self._toc {
            let display = REGEX_HASHMAP[&REGEX_NAME::toc_chapter_prefix]
                .replace(t, "")
                .to_string();
            out.push_str(
                format!(
                    r##"<li><a href="#chapter{}">{}</a></li>"##,
                    n,
                    escape_html(&display)
                )
                .as_str(),
            );
        }
        out.push_str(
            r##"    </ol>
</div>"##,
        );
        out
    }

    // The TOC goes right after the introduction's closing <hr>, or after the
    // introduction's first paragraph when no rule follows. A document with
    // no introduction anchor gets no TOC at all.
    pub fn render_document(&self) -> String {
        let mut content = self._html_lines.join("\n");
        content = REGEX_HASHMAP[&REGEX_NAME::adjacent_lists]
            .replace_all(&content, "")
            .to_string();

        if let Some(intro_idx) = content.find(r#"id="introduction""#) {
            let toc = self.generate_doc_toc();
            match content[intro_idx..].find("<hr>") {
                Some(rel) => {
                    let at = intro_idx + rel + "<hr>".len();
                    content.insert_str(at, format!("\n{}", toc).as_str());
                }
                None => match content[intro_idx..].find("</p>") {
                    Some(rel) => {
                        let at = intro_idx + rel + "</p>".len();
                        content.insert_str(at, format!("\n\n<hr>\n{}", toc).as_str());
                    }
                    None => {}
                },
            }
        }

        let header = DOC_HEADER
            .replace("{{doc_css}}", DOC_CSS)
            .replace("{{title}}", self._meta.title.as_str())
            .replace("{{main_title}}", self._meta.main_title.as_str())
            .replace("{{sub_title}}", self._meta.sub_title.as_str())
            .replace("{{metadata}}", self._meta.metadata.as_str());

        format!("{}{}{}", header, content, DOC_FOOTER)
    }

    pub fn get_filename(&self) -> String {
        self._filename.to_owned()
    }

    pub fn get_meta(&self) -> DOC_META {
        self._meta.to_owned()
    }

    pub fn get_toc(&self) -> Vec<(usize, String)> {
        self._toc.to_owned()
    }

    pub fn get_html_lines(&self) -> Vec<String> {
        self._html_lines.to_owned()
    }
}
