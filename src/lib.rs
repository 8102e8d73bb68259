#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
use pyo3::prelude::*;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod ast;
pub mod compiler;
pub mod dual;
pub mod error;
pub mod inline;
pub mod parser;
pub mod stats;
pub mod title;
pub mod types;

pub use ast::{Node, NodeKind, TextBlock, Token, TokenKind, WhitespaceKind};
pub use compiler::build_script_ast;
pub use dual::process_dual_layers;
pub use error::{Error, Result};
pub use inline::{merge_text_nodes, parse_inline, InlineParser};
pub use parser::{FountainLexer, TokenSource};
pub use stats::{calculate_script_stats, calculate_script_stats_from_text, StatsOptions, StatsResult, WordCountMode};
pub use title::{
    extract_title_entries, parse_screenplay, parse_screenplay_with, split_title_and_body, Screenplay, TitleSplit,
};
pub use types::{InlineNode, MarkerConfig, MarkerKind, MatchMode, Scene, TitleEntry};

/// Text plus a JSON marker list in, pretty JSON `Screenplay` out.
pub fn parse_text_json(text: &str, markers_json: &str) -> Result<String> {
    let markers = MarkerConfig::list_from_json(markers_json)?;
    let play = parse_screenplay(text, &markers);
    serde_json::to_string_pretty(&play).map_err(Error::Encode)
}

/// Text, JSON marker list and JSON options in, pretty JSON `StatsResult` out.
pub fn stats_text_json(text: &str, markers_json: &str, options_json: &str) -> Result<String> {
    let markers = MarkerConfig::list_from_json(markers_json)?;
    let options = StatsOptions::from_json(options_json)?;
    let result = calculate_script_stats_from_text(text, &markers, &options);
    serde_json::to_string_pretty(&result).map_err(Error::Encode)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
#[pyo3(signature = (text, markers_json = String::new()))]
fn parse_text(text: String, markers_json: String) -> PyResult<String> {
    parse_text_json(&text, &markers_json)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()))
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
#[pyo3(signature = (text, markers_json = String::new(), options_json = String::new()))]
fn stats_text(text: String, markers_json: String, options_json: String) -> PyResult<String> {
    stats_text_json(&text, &markers_json, &options_json)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()))
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn parse_text_wasm(text: &str, markers_json: &str) -> std::result::Result<String, JsValue> {
    parse_text_json(text, markers_json).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn stats_text_wasm(text: &str, markers_json: &str, options_json: &str) -> std::result::Result<String, JsValue> {
    stats_text_json(text, markers_json, options_json).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pymodule]
fn screenplay_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(parse_text, m)?)?;
    m.add_function(wrap_pyfunction!(stats_text, m)?)?;
    Ok(())
}
