//! HDF5 containers: one structured document per dataset.
//!
//! The dataset's `label`, `category` or `class` attribute becomes the
//! suggested label. Requires the `hdf5-datasets` feature (and a system
//! libhdf5); without it every `.h5` file is skipped with a warning.

use std::path::Path;

use trove_core::models::Document;

use super::{LoadError, WorkerContext};

#[cfg(feature = "hdf5-datasets")]
pub fn load(path: &Path, ctx: &WorkerContext) -> Result<Vec<Document>, LoadError> {
    use trove_core::models::{DocumentContent, DocumentKind};

    let file = ::hdf5::File::open(path).map_err(|e| LoadError::Hdf5(e.to_string()))?;
    let mut datasets = Vec::new();
    collect_datasets(&file, &mut datasets).map_err(|e| LoadError::Hdf5(e.to_string()))?;

    let mut docs = Vec::new();
    for ds in datasets.into_iter().take(ctx.settings.max_records_per_file) {
        let name = ds.name();
        let summary = summarize(&ds);
        let suggested = ["label", "category", "class"]
            .iter()
            .find_map(|attr| string_attr(&ds, attr));

        let mut doc = Document::new(
            path,
            DocumentKind::Hdf5,
            DocumentContent::Record(vec![(name, summary)]),
        );
        if let Some(label) = suggested {
            doc = doc.with_label(label);
        }
        docs.push(doc);
    }
    Ok(docs)
}

#[cfg(feature = "hdf5-datasets")]
fn collect_datasets(group: &::hdf5::Group, out: &mut Vec<::hdf5::Dataset>) -> ::hdf5::Result<()> {
    out.extend(group.datasets()?);
    for child in group.groups()? {
        collect_datasets(&child, out)?;
    }
    Ok(())
}

#[cfg(feature = "hdf5-datasets")]
fn summarize(ds: &::hdf5::Dataset) -> String {
    const MAX_INLINE_VALUES: usize = 64;
    let shape = ds.shape();
    if ds.size() <= MAX_INLINE_VALUES {
        if let Ok(values) = ds.read_raw::<f64>() {
            let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            return rendered.join(" ");
        }
    }
    format!("dataset shape={:?}", shape)
}

#[cfg(feature = "hdf5-datasets")]
fn string_attr(ds: &::hdf5::Dataset, name: &str) -> Option<String> {
    let attr = ds.attr(name).ok()?;
    let value = attr.read_scalar::<::hdf5::types::VarLenUnicode>().ok()?;
    let value = value.as_str().trim().to_string();
    (!value.is_empty()).then_some(value)
}

#[cfg(not(feature = "hdf5-datasets"))]
pub fn load(path: &Path, _ctx: &WorkerContext) -> Result<Vec<Document>, LoadError> {
    Err(LoadError::Hdf5(format!(
        "{} needs a build with --features hdf5-datasets",
        path.display()
    )))
}
