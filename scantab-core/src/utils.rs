use anyhow::Context;
use colored::*;
use std::{
    fs::{create_dir, create_dir_all, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    entities::{ExtractedTable, PageNumber, ParsedDocument},
    parse::document::{DocumentKind, ScantabParser},
    render::{
        html::to_html,
        table::{csv_table, html_table, TableFormat},
        text::to_text,
    },
};

/// Parses a page selection such as `"1,3-5"` into sorted, deduplicated 1-based pages.
pub fn parse_page_list(pages: &str) -> anyhow::Result<Vec<PageNumber>> {
    let mut selected = Vec::new();
    for part in pages.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let parse = |value: &str| -> anyhow::Result<PageNumber> {
            let page: PageNumber = value
                .trim()
                .parse()
                .with_context(|| format!("invalid page number '{value}'"))?;
            if page == 0 {
                anyhow::bail!("pages are numbered from 1");
            }
            Ok(page)
        };
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    anyhow::bail!("invalid page range {part}");
                }
                selected.extend(start..=end);
            }
            None => selected.push(parse(part)?),
        }
    }
    if selected.is_empty() {
        anyhow::bail!("empty page selection");
    }
    selected.sort_unstable();
    selected.dedup();
    Ok(selected)
}

/// Number of pages that will be parsed, for progress reporting.
pub fn get_doc_length<P: AsRef<Path>>(
    path: P,
    password: Option<&str>,
    pages: Option<&[PageNumber]>,
) -> anyhow::Result<usize> {
    let path = path.as_ref();
    let kind = DocumentKind::from_path(path)?;
    let page_count = match kind {
        DocumentKind::Pdf => {
            let doc = std::fs::read(path).with_context(|| format!("can't read {}", path.display()))?;
            ScantabParser::page_count(&doc, kind, password)?
        }
        DocumentKind::Image => 1,
    };
    Ok(match pages {
        Some(pages) => pages.iter().filter(|&&p| p <= page_count).count(),
        None => page_count,
    })
}

fn sanitize_doc_name(doc_name: &str) -> String {
    doc_name
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
}

fn recreate_result_dir(result_dir_name: &Path) -> anyhow::Result<PathBuf> {
    if std::fs::create_dir(result_dir_name).is_err() {
        std::fs::remove_dir_all(result_dir_name)?;
        std::fs::create_dir(result_dir_name)?;
    };
    Ok(result_dir_name.to_owned())
}

/// Creates `<output_dir>/<doc>-results` (and its `debug` directory), replacing a
/// previous run.
pub fn create_dirs<P: AsRef<Path>>(
    output_dir: Option<P>,
    doc_name: &str,
    debug: bool,
) -> anyhow::Result<(PathBuf, Option<PathBuf>)> {
    let result_dir_name = format!("{}-results", sanitize_doc_name(doc_name));
    let res_dir_path = match output_dir {
        Some(p) => {
            create_dir_all(p.as_ref()).context("can't create output dir")?;
            recreate_result_dir(&p.as_ref().join(&result_dir_name))?
        }
        None => recreate_result_dir(&PathBuf::from(format!("./{}", &result_dir_name)))?,
    };

    let debug_path = if debug {
        let debug_path = res_dir_path.join("debug");
        create_dir(&debug_path).context("cant create debug path")?;
        Some(debug_path)
    } else {
        None
    };
    Ok((res_dir_path, debug_path))
}

fn write_file(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("can't create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(content)?;
    writer.flush()?;
    Ok(())
}

/// Writes `page_<p>/table_<t>/table.{html,csv,json,png}`.
fn save_table(res_dir_path: &Path, table: &ExtractedTable) -> anyhow::Result<()> {
    let table_dir = res_dir_path
        .join(format!("page_{}", table.page_number))
        .join(format!("table_{}", table.table_number));
    create_dir_all(&table_dir).context("can't create table dir")?;

    write_file(&table_dir.join("table.html"), html_table(&table.grid).as_bytes())?;
    write_file(&table_dir.join("table.csv"), csv_table(&table.grid)?.as_bytes())?;
    write_file(
        &table_dir.join("table.json"),
        serde_json::to_string_pretty(table)?.as_bytes(),
    )?;
    if let Some(crop) = &table.crop {
        crop.save(table_dir.join("table.png"))
            .context("can't save table crop")?;
    }
    Ok(())
}

pub fn save_parsed_document(
    doc: &ParsedDocument,
    res_dir_path: PathBuf,
    save_html: bool,
) -> anyhow::Result<()> {
    let sanitized_doc_name = sanitize_doc_name(&doc.doc_name);

    let doc_json = serde_json::to_string(&doc)?;
    write_file(
        &res_dir_path.join(format!("{}.json", &sanitized_doc_name)),
        doc_json.as_bytes(),
    )?;

    let md_content = to_text(doc, TableFormat::Markdown)?;
    write_file(
        &res_dir_path.join(format!("{}.md", &sanitized_doc_name)),
        md_content.as_bytes(),
    )?;
    let txt_content = to_text(doc, TableFormat::Plain)?;
    write_file(
        &res_dir_path.join(format!("{}.txt", &sanitized_doc_name)),
        txt_content.as_bytes(),
    )?;

    if save_html {
        let html_content = to_html(doc, &doc.doc_name)?;
        write_file(
            &res_dir_path.join(format!("{}.html", &sanitized_doc_name)),
            html_content.as_bytes(),
        )?;
    }

    for table in doc.tables() {
        save_table(&res_dir_path, table).with_context(|| {
            format!(
                "can't save table {} of page {}",
                table.table_number, table.page_number
            )
        })?;
    }

    if let Some(dbg_path) = &doc.debug_path {
        println!(
            "{} Debug output saved in: {}",
            "ℹ".yellow().bold(),
            dbg_path.display().to_string().yellow().underline()
        );
    }
    println!(
        "{} Results saved in: {}",
        "✓".green().bold(),
        res_dir_path.display().to_string().cyan().underline()
    );

    Ok(())
}
