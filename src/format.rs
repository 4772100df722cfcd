//! Funções puras de formatação usadas pelo decodificador de respostas do Tiny.
//!
//! Cobrem documentos (CPF/CNPJ), CEP, datas, números decimais e normalização
//! de texto. Nenhuma função aqui entra em pânico com entrada malformada: o pior
//! caso é devolver o valor recebido com o mínimo de transformação.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

static ZIP_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{5}-[0-9]{3}$").expect("valid zip code regex"));

static DOUBLE_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid whitespace regex"));

// Separadores removidos de documentos, CEPs e observações.
const SEPARATORS: [char; 3] = ['-', '.', '/'];

/// Remove os separadores `-`, `.` e `/` e troca quebras de linha por espaço.
pub fn remove_separators(value: &str) -> String {
    value
        .chars()
        .filter(|c| !SEPARATORS.contains(c))
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

// Fatia por caracteres sem estourar os limites da string.
fn slice(value: &str, start: usize, end: usize) -> String {
    value.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn tail(value: &str, start: usize) -> String {
    value.chars().skip(start).collect()
}

/// Formata um CPF já sem separadores como `NNN.NNN.NNN-NN`.
pub fn format_cpf(digits: &str) -> String {
    format!(
        "{}.{}.{}-{}",
        slice(digits, 0, 3),
        slice(digits, 3, 6),
        slice(digits, 6, 9),
        slice(digits, 9, 11)
    )
}

/// Formata um CNPJ já sem separadores como `NN.NNN.NNN/NNNN-NN`.
pub fn format_cnpj(digits: &str) -> String {
    format!(
        "{}.{}.{}/{}-{}",
        slice(digits, 0, 2),
        slice(digits, 2, 5),
        slice(digits, 5, 8),
        slice(digits, 8, 12),
        tail(digits, 12)
    )
}

/// Normaliza um documento (CPF ou CNPJ) para a pontuação canônica.
///
/// O tipo é decidido pelo comprimento depois de remover os separadores:
/// 11 dígitos viram CPF, qualquer outro comprimento vira CNPJ.
/// Valores vazios resultam em `None`.
pub fn format_document(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let digits: String = remove_separators(trimmed).chars().filter(|c| !c.is_whitespace()).collect();
    if digits.chars().count() == 11 {
        Some(format_cpf(&digits))
    } else {
        Some(format_cnpj(&digits))
    }
}

/// Retorna `true` quando o valor já está no formato `NNNNN-NNN`.
pub fn is_zip_code(value: &str) -> bool {
    ZIP_CODE.is_match(value)
}

/// Normaliza um CEP para `NNNNN-NNN`.
///
/// Um valor já formatado é devolvido sem alteração; caso contrário os
/// separadores são removidos e o hífen é reinserido na posição fixa.
pub fn format_zip_code(value: &str) -> String {
    let trimmed = value.trim();
    if is_zip_code(trimmed) {
        return trimmed.to_string();
    }

    let digits = remove_separators(trimmed).replace(' ', "");
    format!("{}-{}", slice(&digits, 0, 5), slice(&digits, 5, 8))
}

/// Converte `ddmmaaaa` (com ou sem separadores) em `dd/mm/aa`.
///
/// Valores com outro comprimento são devolvidos como vieram.
pub fn format_date(value: &str) -> String {
    let digits = remove_separators(value);
    if digits.chars().count() != 8 {
        return value.to_string();
    }
    format!("{}/{}/{}", slice(&digits, 0, 2), slice(&digits, 2, 4), slice(&digits, 4, 6))
}

/// Data no formato aceito pelos filtros de pesquisa do Tiny (`dd/mm/aaaa`).
pub fn tiny_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Interpreta um número decimal aceitando vírgula como separador decimal.
///
/// O resultado é arredondado para duas casas. Vazio ou inválido vira zero.
pub fn parse_decimal(value: &str) -> Decimal {
    let normalized = value.trim().replace(',', ".");
    if normalized.is_empty() {
        return Decimal::ZERO;
    }
    normalized
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&normalized))
        .map(round_money)
        .unwrap_or(Decimal::ZERO)
}

/// Arredonda para duas casas decimais (meio para longe do zero).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Normaliza campos de endereço: remove caracteres de controle, apara e
/// converte para maiúsculas. Vazio vira `None`.
pub fn normalize_text(value: &str) -> Option<String> {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let cleaned = cleaned.trim().to_uppercase();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Como [`normalize_text`], colapsando também espaços duplicados.
/// Usado para nomes de pessoas e empresas.
pub fn normalize_name(value: &str) -> Option<String> {
    normalize_text(value).map(|text| DOUBLE_SPACES.replace_all(&text, " ").into_owned())
}

/// Limpa observações livres: separadores removidos, quebras de linha viram
/// espaço, bordas aparadas. Vazio vira `None`.
pub fn clean_observation(value: &str) -> Option<String> {
    let cleaned = remove_separators(value);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() { None } else { Some(cleaned.to_string()) }
}
