//! Notebook document model: ordered, taggable cells and their captured
//! outputs (ipynb v4 on disk).

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Code,
    /// Markdown, raw, and anything else that is never executed.
    Other,
}

/// One output entry, as produced by a kernel or stored in an ipynb file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    ExecuteResult {
        #[serde(default)]
        data: serde_json::Map<String, Value>,
    },
    Stream {
        name: String,
        #[serde(deserialize_with = "text_or_lines")]
        text: String,
    },
    DisplayData {
        #[serde(default)]
        data: serde_json::Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

/// Captured output of an executed cell, split into the four channels.
#[derive(Debug, Clone, Default)]
pub struct CellOutput {
    /// Returned-value payloads, mime-typed.
    pub results: Vec<(String, Value)>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Rich display payloads, mime-typed.
    pub display: Vec<(String, Value)>,
}

impl CellOutput {
    /// First result payload under `mime`, flattened to text.
    pub fn result_text(&self, mime: &str) -> Option<String> {
        self.results
            .iter()
            .find(|(m, _)| m == mime)
            .and_then(|(_, v)| value_text(v))
    }
}

/// Mime data in notebooks may be stored as one string or a line array.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let mut text = String::new();
            for item in items {
                text.push_str(item.as_str()?);
            }
            Some(text)
        }
        _ => None,
    }
}

fn text_or_lines<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrLines {
        Text(String),
        Lines(Vec<String>),
    }
    Ok(match TextOrLines::deserialize(deserializer)? {
        TextOrLines::Text(s) => s,
        TextOrLines::Lines(lines) => lines.concat(),
    })
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub index: usize,
    pub cell_type: CellType,
    pub source: String,
    pub tags: BTreeSet<String>,
    outputs: Vec<Output>,
}

impl Cell {
    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn raw_outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Split the raw outputs into channels. An error output aborts the
    /// interpretation and surfaces as [`Error::Remote`].
    pub fn output(&self) -> Result<CellOutput> {
        let mut out = CellOutput::default();
        for o in &self.outputs {
            match o {
                Output::ExecuteResult { data } => out
                    .results
                    .extend(data.iter().map(|(k, v)| (k.clone(), v.clone()))),
                Output::Stream { name, text } => {
                    let channel = match name.as_str() {
                        "stdout" => &mut out.stdout,
                        _ => &mut out.stderr,
                    };
                    channel.get_or_insert_with(String::new).push_str(text);
                }
                Output::DisplayData { data } => out
                    .display
                    .extend(data.iter().map(|(k, v)| (k.clone(), v.clone()))),
                Output::Error {
                    ename,
                    evalue,
                    traceback,
                } => {
                    return Err(Error::Remote {
                        name: ename.clone(),
                        message: evalue.clone(),
                        trace: traceback.clone(),
                    })
                }
            }
        }
        Ok(out)
    }
}

/// Selects code cells by tag intersection and/or an inclusive tag range.
#[derive(Debug, Clone, Default)]
pub struct CellSelector {
    pub tags: Vec<String>,
    pub from_tag: Option<String>,
    pub to_tag: Option<String>,
}

impl CellSelector {
    /// All code cells.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tags: vec![tag.into()],
            ..Self::default()
        }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn range(from_tag: impl Into<String>, to_tag: impl Into<String>) -> Self {
        Self {
            from_tag: Some(from_tag.into()),
            to_tag: Some(to_tag.into()),
            ..Self::default()
        }
    }

    pub fn starting_at(mut self, from_tag: impl Into<String>) -> Self {
        self.from_tag = Some(from_tag.into());
        self
    }

    pub fn ending_at(mut self, to_tag: impl Into<String>) -> Self {
        self.to_tag = Some(to_tag.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Ordered, append-only collection of cells.
#[derive(Debug, Default)]
pub struct Document {
    cells: Vec<Cell>,
}

// Raw ipynb v4 shapes, converted to `Cell` on load.
#[derive(Deserialize)]
struct RawNotebook {
    #[serde(default)]
    cells: Vec<RawCell>,
}

#[derive(Deserialize)]
struct RawCell {
    cell_type: String,
    #[serde(default, deserialize_with = "text_or_lines")]
    source: String,
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    outputs: Vec<Output>,
}

#[derive(Deserialize, Default)]
struct RawMetadata {
    #[serde(default)]
    tags: Vec<String>,
}

impl Document {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawNotebook = serde_json::from_str(text)
            .map_err(|e| Error::encoding(format!("notebook parse: {e}")))?;
        let cells = raw
            .cells
            .into_iter()
            .enumerate()
            .map(|(index, c)| Cell {
                index,
                cell_type: if c.cell_type == "code" {
                    CellType::Code
                } else {
                    CellType::Other
                },
                source: c.source,
                tags: c.metadata.tags.into_iter().collect(),
                outputs: c.outputs,
            })
            .collect();
        Ok(Self { cells })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Append a synthesized code cell and return its index.
    pub fn append_code(&mut self, source: &str) -> usize {
        let index = self.cells.len();
        self.cells.push(Cell {
            index,
            cell_type: CellType::Code,
            source: source.to_string(),
            tags: BTreeSet::new(),
            outputs: Vec::new(),
        });
        index
    }

    pub(crate) fn set_outputs(&mut self, index: usize, outputs: Vec<Output>) {
        if let Some(cell) = self.cells.get_mut(index) {
            cell.outputs = outputs;
        }
    }

    /// Indices of code cells matched by `selector`, in document order.
    ///
    /// The range filter is applied first; tags narrow within it. The walk
    /// stops after the first cell carrying `to_tag`, even when that cell
    /// itself is filtered out of the result.
    pub fn matching(&self, selector: &CellSelector) -> Vec<usize> {
        let mut started = selector.from_tag.is_none();
        let mut matched = Vec::new();

        for cell in &self.cells {
            if let Some(from) = &selector.from_tag {
                if cell.has_tag(from) {
                    started = true;
                }
            }
            let stop = selector
                .to_tag
                .as_ref()
                .is_some_and(|to| cell.has_tag(to));

            if cell.is_code()
                && started
                && (selector.tags.is_empty() || selector.tags.iter().any(|t| cell.has_tag(t)))
            {
                matched.push(cell.index);
            }

            if stop {
                break;
            }
        }

        matched
    }

    /// First matching code cell, or [`Error::CellNotFound`].
    pub fn first_matching(&self, selector: &CellSelector) -> Result<usize> {
        self.matching(selector)
            .into_iter()
            .next()
            .ok_or(Error::CellNotFound)
    }
}
