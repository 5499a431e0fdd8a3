//! Keyword scripts.
//!
//! A script is a list of keyword calls, one per line, with cells separated by
//! ` | ` (a pipe with whitespace on both sides), so a bare `|` inside a value
//! stays part of the cell. Leading and trailing pipes are optional. Cells of
//! the form `name=value` bind named arguments when `name` is one of the
//! keyword's parameters. Lines starting with `#` are comments.
//!
//! ```text
//! | Connect To Couchbase Bucket | localhost | 8091 | orders | alias=main |
//! | Upsert Document             | 1C1#000   | {"state": "new|open"}      |
//! | Validate Document By Json   | 1C1#000   | .state:val("new|open")     |
//! ```

use std::collections::HashMap;
use std::io::Write;

use anyhow::Context;
use serde_json::Value;

use crate::keywords::BucketLibrary;
use crate::store::{ConnectionSpec, NetworkMode};

/// Every keyword the library exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Connect,
    Disconnect,
    CloseAll,
    Switch,
    View,
    Contains,
    GetCas,
    GetValue,
    Validate,
    Delete,
    Upsert,
}

impl Keyword {
    pub const ALL: [Keyword; 11] = [
        Keyword::Connect,
        Keyword::Disconnect,
        Keyword::CloseAll,
        Keyword::Switch,
        Keyword::View,
        Keyword::Contains,
        Keyword::GetCas,
        Keyword::GetValue,
        Keyword::Validate,
        Keyword::Delete,
        Keyword::Upsert,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Keyword::Connect => "Connect To Couchbase Bucket",
            Keyword::Disconnect => "Disconnect From Couchbase Bucket",
            Keyword::CloseAll => "Close All Couchbase Bucket Connections",
            Keyword::Switch => "Switch Couchbase Bucket Connections",
            Keyword::View => "View Document By Key",
            Keyword::Contains => "Bucket Contains Document By Key",
            Keyword::GetCas => "Get Document Cas By Key",
            Keyword::GetValue => "Get Document Value By Key",
            Keyword::Validate => "Validate Document By Json",
            Keyword::Delete => "Certainly Delete Document By Key",
            Keyword::Upsert => "Upsert Document",
        }
    }

    /// Parameter names in positional order.
    #[must_use]
    pub fn params(self) -> &'static [&'static str] {
        match self {
            Keyword::Connect => &["host", "port", "bucket_name", "password", "alias", "network"],
            Keyword::Disconnect | Keyword::CloseAll => &[],
            Keyword::Switch => &["index_or_alias"],
            Keyword::View
            | Keyword::Contains
            | Keyword::GetCas
            | Keyword::GetValue
            | Keyword::Delete => &["key"],
            Keyword::Validate => &["key", "json_expr"],
            Keyword::Upsert => &["key", "value"],
        }
    }

    /// Number of leading parameters that must be supplied.
    fn required(self) -> usize {
        match self {
            Keyword::Connect => 3,
            other => other.params().len(),
        }
    }

    /// Other accepted spellings of the keyword name.
    fn alternate_names(self) -> &'static [&'static str] {
        match self {
            Keyword::Switch => &[
                "Switch Couchbase Bucket Connection",
                "Switch Couchbase Connection",
            ],
            _ => &[],
        }
    }

    /// Find a keyword by name, ignoring case, spaces and underscores.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        let wanted = normalize(name);
        Self::ALL.into_iter().find(|keyword| {
            std::iter::once(keyword.name())
                .chain(keyword.alternate_names().iter().copied())
                .any(|candidate| normalize(candidate) == wanted)
        })
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// One keyword call read from a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// 1-based line number in the script.
    pub line: usize,
    pub keyword: String,
    pub cells: Vec<String>,
}

/// Split a script into keyword calls.
#[must_use]
pub fn parse_script(script: &str) -> Vec<Invocation> {
    script
        .lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }
            let trimmed = trimmed.strip_prefix('|').map_or(trimmed, str::trim_start);
            let trimmed = trimmed
                .strip_suffix('|')
                .filter(|rest| rest.is_empty() || rest.ends_with(char::is_whitespace))
                .map_or(trimmed, str::trim_end);

            let mut cells = split_cells(trimmed).map(|cell| cell.trim().to_string());
            let keyword = cells.next().filter(|k| !k.is_empty())?;
            Some(Invocation {
                line: i + 1,
                keyword,
                cells: cells.collect(),
            })
        })
        .collect()
}

/// Split a line on pipes that have whitespace on both sides.
fn split_cells(line: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(line);
    std::iter::from_fn(move || {
        let current = rest?;
        let separator = current.char_indices().find(|&(i, c)| {
            c == '|'
                && current[..i].ends_with(char::is_whitespace)
                && current[i + 1..].starts_with(char::is_whitespace)
        });
        match separator {
            Some((i, _)) => {
                rest = Some(&current[i + 1..]);
                Some(&current[..i])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

/// Arguments of one call, bound to parameter names.
struct Args {
    values: HashMap<&'static str, String>,
}

impl Args {
    fn bind(keyword: Keyword, cells: &[String]) -> anyhow::Result<Self> {
        let params = keyword.params();
        let mut values = HashMap::new();
        let mut position = 0;

        for cell in cells {
            let named = cell.split_once('=').and_then(|(name, value)| {
                params
                    .iter()
                    .find(|param| **param == name.trim())
                    .map(|param| (*param, value.trim()))
            });

            match named {
                Some((param, value)) => {
                    if values.insert(param, value.to_string()).is_some() {
                        anyhow::bail!("argument '{param}' given more than once");
                    }
                }
                None => {
                    let Some(&param) = params.get(position) else {
                        anyhow::bail!(
                            "expected at most {} arguments, got {}",
                            params.len(),
                            cells.len()
                        );
                    };
                    if values.insert(param, cell.clone()).is_some() {
                        anyhow::bail!("argument '{param}' given more than once");
                    }
                    position += 1;
                }
            }
        }

        for param in &params[..keyword.required()] {
            if !values.contains_key(param) {
                anyhow::bail!("missing argument '{param}'");
            }
        }

        Ok(Self { values })
    }

    fn required(&self, name: &str) -> anyhow::Result<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing argument '{name}'"))
    }

    /// Optional argument; an empty cell counts as absent.
    fn optional(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Runs keyword scripts against one [`BucketLibrary`].
pub struct ScriptRunner {
    library: BucketLibrary,
    network: NetworkMode,
}

impl ScriptRunner {
    /// `network` is used by connect calls that do not pass one.
    #[must_use]
    pub fn new(library: BucketLibrary, network: NetworkMode) -> Self {
        Self { library, network }
    }

    #[must_use]
    pub fn library(&self) -> &BucketLibrary {
        &self.library
    }

    /// Run a whole script, writing `keyword => result` lines to `out`.
    ///
    /// Stops at the first failing keyword. Every connection is closed when
    /// the script ends, whether it failed or not. Returns the number of
    /// keywords executed.
    ///
    /// # Errors
    ///
    /// Returns the first keyword failure, with its line number.
    pub fn run<W: Write>(&mut self, script: &str, out: &mut W) -> anyhow::Result<usize> {
        let invocations = parse_script(script);
        let result = self.run_all(&invocations, out);
        self.library.close_all_bucket_connections();
        result
    }

    fn run_all<W: Write>(
        &mut self,
        invocations: &[Invocation],
        out: &mut W,
    ) -> anyhow::Result<usize> {
        for (count, invocation) in invocations.iter().enumerate() {
            let rendered = self
                .execute(invocation)
                .with_context(|| format!("line {}: {}", invocation.line, invocation.keyword))?;
            writeln!(out, "{} => {rendered}", invocation.keyword)?;
            tracing::debug!(line = invocation.line, executed = count + 1, "Keyword passed");
        }
        Ok(invocations.len())
    }

    /// Execute one call and render its return value.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keywords, bad arguments, or a failing
    /// keyword.
    pub fn execute(&mut self, invocation: &Invocation) -> anyhow::Result<String> {
        let keyword = Keyword::lookup(&invocation.keyword)
            .ok_or_else(|| anyhow::anyhow!("No keyword with name '{}' found", invocation.keyword))?;
        let args = Args::bind(keyword, &invocation.cells)?;

        let rendered = match keyword {
            Keyword::Connect => {
                let port = args.required("port")?;
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("invalid port '{port}'"))?;
                let mut spec = ConnectionSpec::new(
                    args.required("host")?,
                    port,
                    args.required("bucket_name")?,
                )
                .network(self.network);
                if let Some(password) = args.optional("password") {
                    spec = spec.password(password);
                }
                if let Some(network) = args.optional("network") {
                    let network = network.parse::<NetworkMode>().map_err(anyhow::Error::msg)?;
                    spec = spec.network(network);
                }
                let index = self
                    .library
                    .connect_to_bucket(&spec, args.optional("alias"))?;
                index.to_string()
            }
            Keyword::Disconnect => {
                self.library.disconnect_from_bucket();
                render_none()
            }
            Keyword::CloseAll => {
                self.library.close_all_bucket_connections();
                render_none()
            }
            Keyword::Switch => {
                let previous = self
                    .library
                    .switch_bucket_connection(args.required("index_or_alias")?)?;
                previous.map_or_else(render_none, |index| index.to_string())
            }
            Keyword::View => self
                .library
                .view_document_by_key(args.required("key")?)?
                .to_string(),
            Keyword::Contains => self
                .library
                .bucket_contains_document_by_key(args.required("key")?)?
                .to_string(),
            Keyword::GetCas => self
                .library
                .get_document_cas_by_key(args.required("key")?)?
                .to_string(),
            Keyword::GetValue => self
                .library
                .get_document_value_by_key(args.required("key")?)?
                .to_string(),
            Keyword::Validate => self
                .library
                .validate_document_by_json(args.required("key")?, args.required("json_expr")?)?
                .to_string(),
            Keyword::Delete => {
                self.library
                    .certainly_delete_document_by_key(args.required("key")?)?;
                render_none()
            }
            Keyword::Upsert => {
                let value = parse_value(args.required("value")?);
                self.library.upsert_document(args.required("key")?, &value)?;
                render_none()
            }
        };

        Ok(rendered)
    }
}

fn render_none() -> String {
    "None".to_string()
}

/// JSON text becomes structured data; anything else is stored as a string.
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
