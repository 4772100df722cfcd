use std::io::{Cursor, Read};
use std::path::Path;

use reqwest::Url;
use tracing::{debug, info};
use zip::ZipArchive;

use super::{Context, Step, Successor, file_stem, hold, release, request};
use crate::error::Result;
use crate::model::{Configuration, Order};
use crate::store::blob_path;

/// Busca a expedição da nota do pedido e segue para as etiquetas.
/// O pedido fica marcado como em execução até o fim da cadeia.
pub async fn save_expedition_info(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    hold(ctx, order)?;
    let outcome = fetch_expedition(ctx, next, configuration, order).await;
    release(ctx, order, outcome)
}

async fn fetch_expedition(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    let response = request(
        ctx,
        configuration,
        "expedicao.obter.php",
        vec![
            ("idObjeto", order.invoice_id.unwrap_or_default().to_string()),
            ("tipoObjeto", "notafiscal".to_string()),
        ],
    )
    .await?;

    info!(order = %order, "Save expedition info");
    let expedition = response.expedition().unwrap_or_default();
    order.expedition_id = expedition.expedition_id;
    order.group_expedition_id = expedition.group_expedition_id;
    ctx.store.save_order(order)?;

    next.trigger(Step::SaveLabels, configuration, order).await
}

/// Baixa as etiquetas da expedição. Arquivos compactados têm cada entrada
/// gravada com a própria extensão (`.txt` vira `.zpl`); os demais são gravados
/// com a extensão da URL.
pub async fn save_labels(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    let response = request(
        ctx,
        configuration,
        "expedicao.obter.etiquetas.impressao.php",
        vec![("idExpedicao", order.expedition_id.unwrap_or_default().to_string())],
    )
    .await?;

    let urls = response.labels();
    if urls.is_empty() {
        debug!(order = %order, "expedition has no labels yet");
        return Ok(());
    }

    info!(order = %order, labels = urls.len(), "Save labels");
    let stem = file_stem(order);
    for url in &urls {
        let content = ctx.source.download(url).await?;
        for (extension, bytes) in label_files(url, &content)? {
            let path = blob_path(&configuration.name, &stem, &extension);
            ctx.blobs.put(&path, bytes).await?;
            order.label = Some(path);
        }
    }
    ctx.store.save_order(order)?;

    next.trigger(Step::SendLabel, configuration, order).await
}

/// Arquivos a gravar para o conteúdo baixado de `url`, como (extensão, bytes).
fn label_files(url: &str, content: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let Ok(mut archive) = ZipArchive::new(Cursor::new(content)) else {
        return Ok(match url_extension(url) {
            Some(extension) => vec![(extension, content.to_vec())],
            None => {
                debug!(url, "label URL without extension skipped");
                Vec::new()
            }
        });
    };

    let mut files = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let extension = archive_extension(entry.name());
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        files.push((extension, bytes));
    }
    Ok(files)
}

// Entradas `.txt` ou sem extensão são etiquetas ZPL.
fn archive_extension(name: &str) -> String {
    match extension_of(name).as_deref() {
        None | Some("txt") => "zpl".to_string(),
        Some(other) => other.to_string(),
    }
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?.to_string();
    extension_of(&last)
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
}
