use std::path::PathBuf;

use pyo3::exceptions::{PyKeyError, PyRuntimeError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::Config;
use crate::error::FigureError;
use crate::matcher::FigureSource;
use crate::pdf_source::PdfSource;
use crate::references;
use crate::session::DocumentSession;
use crate::source::PageSource;
use crate::splitter::{CommandSplitter, SubfigureSplitter, UnavailableSplitter};

/// Convert a [`FigureError`] into a Python exception.
fn figure_err(err: FigureError) -> PyErr {
    if err.is_not_found() {
        PyKeyError::new_err(err.to_string())
    } else {
        PyRuntimeError::new_err(err.to_string())
    }
}

#[pyfunction]
fn get_page_count(path: &str) -> PyResult<usize> {
    let source = PdfSource::open(path).map_err(figure_err)?;
    Ok(source.page_count())
}

#[pyfunction]
#[pyo3(signature = (text, page = 1))]
fn extract_references(py: Python<'_>, text: &str, page: u32) -> PyResult<Vec<Py<PyDict>>> {
    let mut output = Vec::new();
    for citation in references::extract_references(text, page) {
        let dict = PyDict::new(py);
        dict.set_item("text", citation.raw_text)?;
        dict.set_item("figure", citation.figure_number)?;
        dict.set_item("subfigure", citation.subfigure)?;
        dict.set_item("page", citation.page)?;
        dict.set_item("start", citation.start)?;
        dict.set_item("end", citation.end)?;
        output.push(dict.into());
    }
    Ok(output)
}

/// Load a PDF and return `{"report": {...}, "figures": {n: {...}}}`.
#[pyfunction]
#[pyo3(signature = (path, data_dir = None, config_path = None))]
fn load_figure_map(
    py: Python<'_>,
    path: &str,
    data_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> PyResult<Py<PyDict>> {
    let mut config = match config_path {
        Some(config_path) => Config::from_toml_file(config_path).map_err(figure_err)?,
        None => Config::default(),
    };
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }
    let source = PdfSource::open(path).map_err(figure_err)?;
    let command = CommandSplitter::new(config.splitter.clone());
    let splitter: Box<dyn SubfigureSplitter> = if command.is_available() {
        Box::new(command)
    } else {
        Box::new(UnavailableSplitter)
    };
    let session = DocumentSession::load(&source, &config, splitter).map_err(figure_err)?;

    let report = session.report();
    let report_dict = PyDict::new(py);
    report_dict.set_item("pages", report.pages)?;
    report_dict.set_item("text_pages", report.text_pages)?;
    report_dict.set_item("raw_objects", report.raw_objects)?;
    report_dict.set_item("extracted_images", report.extracted_images)?;
    report_dict.set_item("citations", report.citations)?;
    report_dict.set_item("cited", report.cited)?;
    report_dict.set_item("matched", report.matched)?;
    report_dict.set_item("fallback", report.fallback)?;
    report_dict.set_item("unmatched", report.unmatched.clone())?;
    report_dict.set_item("failed_pages", report.failed_pages.clone())?;

    let figures = PyDict::new(py);
    for record in session.figure_map().iter() {
        let dict = PyDict::new(py);
        dict.set_item("path", record.canonical_image_path.to_string_lossy().into_owned())?;
        dict.set_item("page", record.page)?;
        dict.set_item("image_id", record.image_id)?;
        dict.set_item(
            "source",
            match record.source {
                FigureSource::Cited => "cited",
                FigureSource::Fallback => "fallback",
            },
        )?;
        dict.set_item("split_attempted", record.split_attempted())?;
        figures.set_item(record.figure_number, dict)?;
    }

    let output = PyDict::new(py);
    output.set_item("report", report_dict)?;
    output.set_item("figures", figures)?;
    Ok(output.into())
}

#[pymodule]
fn figmap(_py: Python, m: &Bound<PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(get_page_count, m)?)?;
    m.add_function(wrap_pyfunction!(extract_references, m)?)?;
    m.add_function(wrap_pyfunction!(load_figure_map, m)?)?;
    Ok(())
}
