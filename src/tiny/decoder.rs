//! Decodificador das respostas da API do Tiny.
//!
//! O Tiny responde JSON sob `retorno`, exceto o recurso de XML da nota, que
//! pode devolver o XML cru. Corpos que não são JSON ficam guardados como
//! texto opaco. A decodificação estrutural nunca falha por erro de negócio:
//! quem chama deve consultar [`TinyResponse::has_error`].

use quick_xml::Reader;
use quick_xml::events::Event;
use quick_xml::name::QName;
use serde_json::Value;

use super::types::{ExpeditionInfo, InvoiceDetail, OrderDetail, OrderSummary, field_i64, field_str};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Json(Value),
    Raw(String),
}

/// Resposta decodificada de um recurso do Tiny.
#[derive(Debug, Clone, PartialEq)]
pub struct TinyResponse {
    body: Body,
}

impl TinyResponse {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let body = match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Body::Json(value),
            Err(_) => Body::Raw(decode_text(bytes)),
        };
        Self { body }
    }

    pub fn from_json(value: Value) -> Self {
        Self { body: Body::Json(value) }
    }

    /// Objeto `retorno`, ou `Null` quando o corpo não é JSON.
    pub fn retorno(&self) -> &Value {
        match &self.body {
            Body::Json(value) => value.get("retorno").unwrap_or(&Value::Null),
            Body::Raw(_) => &Value::Null,
        }
    }

    /// Corpo original quando não era JSON.
    pub fn raw(&self) -> Option<&str> {
        match &self.body {
            Body::Raw(text) => Some(text),
            Body::Json(_) => None,
        }
    }

    pub fn has_error(&self) -> bool {
        match &self.body {
            Body::Json(_) => {
                let retorno = self.retorno();
                let status_error = field_str(retorno, "status")
                    .is_some_and(|status| status.eq_ignore_ascii_case("erro"));
                let has_errors = match retorno.get("erros") {
                    Some(Value::Array(errors)) => !errors.is_empty(),
                    Some(Value::Object(_)) | Some(Value::String(_)) => true,
                    _ => false,
                };
                status_error || has_errors
            }
            Body::Raw(text) => xml_element(text, "status")
                .ok()
                .flatten()
                .is_some_and(|status| status.trim().eq_ignore_ascii_case("erro")),
        }
    }

    /// Primeira mensagem de erro: `erros` como lista (primeiro `erro`) ou objeto.
    pub fn error_message(&self) -> Option<String> {
        match &self.body {
            Body::Json(_) => match self.retorno().get("erros")? {
                Value::Array(errors) => errors.first().and_then(error_text),
                other => error_text(other),
            },
            Body::Raw(text) => xml_element(text, "erro").ok().flatten(),
        }
    }

    /// `pedidos[].pedido`.
    pub fn orders(&self) -> Vec<OrderSummary> {
        self.retorno()
            .get("pedidos")
            .and_then(Value::as_array)
            .map(|orders| {
                orders
                    .iter()
                    .filter_map(|entry| entry.get("pedido"))
                    .map(OrderSummary::from_value)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn order(&self) -> Option<OrderDetail> {
        self.retorno().get("pedido").map(OrderDetail::from_value)
    }

    pub fn invoice(&self) -> Option<InvoiceDetail> {
        self.retorno().get("nota_fiscal").map(InvoiceDetail::from_value)
    }

    pub fn expedition(&self) -> Option<ExpeditionInfo> {
        self.retorno().get("expedicao").map(ExpeditionInfo::from_value)
    }

    /// URLs de etiqueta em `links[].link`.
    pub fn labels(&self) -> Vec<String> {
        self.retorno()
            .get("links")
            .and_then(Value::as_array)
            .map(|links| {
                links
                    .iter()
                    .filter_map(|entry| match entry {
                        Value::String(link) => Some(link.clone()),
                        other => field_str(other, "link"),
                    })
                    .filter(|link| !link.trim().is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `numero_paginas`, no mínimo 1.
    pub fn page_count(&self) -> u32 {
        field_i64(self.retorno(), "numero_paginas")
            .and_then(|pages| u32::try_from(pages).ok())
            .unwrap_or(1)
            .max(1)
    }

    /// Conteúdo de `xml_nfe`, como string JSON ou como elemento XML, sempre
    /// com a declaração XML.
    pub fn invoice_xml(&self) -> crate::error::Result<Option<String>> {
        let xml = match &self.body {
            Body::Json(_) => field_str(self.retorno(), "xml_nfe"),
            Body::Raw(text) => xml_element(text, "xml_nfe")?,
        };
        Ok(xml
            .map(|xml| xml.trim().to_string())
            .filter(|xml| !xml.is_empty())
            .map(with_declaration))
    }
}

fn error_text(entry: &Value) -> Option<String> {
    match entry {
        Value::String(message) => Some(message.clone()),
        other => field_str(other, "erro"),
    }
}

fn with_declaration(xml: String) -> String {
    if xml.starts_with("<?xml") {
        xml
    } else {
        format!("{XML_DECLARATION}{xml}")
    }
}

/// UTF-8 com recuo para Latin-1.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
            text.into_owned()
        }
    }
}

/// Conteúdo bruto do primeiro elemento `tag`, preservando a marcação interna.
fn xml_element(text: &str, tag: &str) -> crate::error::Result<Option<String>> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event()? {
            Event::Start(start) if start.name().as_ref() == tag.as_bytes() => {
                let name = start.name().as_ref().to_vec();
                let span = reader.read_to_end(QName(&name))?;
                let begin = usize::try_from(span.start).unwrap_or(0);
                let end = usize::try_from(span.end).unwrap_or(begin);
                return Ok(text.get(begin..end).map(str::to_string));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_list_takes_first_message() {
        let response = TinyResponse::from_json(json!({
            "retorno": {
                "status": "Erro",
                "codigo_erro": 20,
                "erros": [{"erro": "A consulta não retornou registros"}, {"erro": "outro"}]
            }
        }));
        assert!(response.has_error());
        assert_eq!(response.error_message().as_deref(), Some("A consulta não retornou registros"));
    }

    #[test]
    fn error_object_is_read() {
        let response = TinyResponse::from_json(json!({"retorno": {"erros": {"erro": "token inválido"}}}));
        assert!(response.has_error());
        assert_eq!(response.error_message().as_deref(), Some("token inválido"));
    }

    #[test]
    fn successful_response_has_no_error() {
        let response = TinyResponse::from_json(json!({
            "retorno": {"status_processamento": 3, "status": "OK", "numero_paginas": 4}
        }));
        assert!(!response.has_error());
        assert!(response.error_message().is_none());
        assert_eq!(response.page_count(), 4);
    }

    #[test]
    fn missing_keys_are_neutral() {
        let response = TinyResponse::from_json(json!({}));
        assert!(response.orders().is_empty());
        assert!(response.order().is_none());
        assert!(response.invoice().is_none());
        assert!(response.labels().is_empty());
        assert_eq!(response.page_count(), 1);
    }

    #[test]
    fn order_list_is_decoded() {
        let response = TinyResponse::from_json(json!({
            "retorno": {
                "pedidos": [
                    {"pedido": {"id": "10", "numero": "1001", "numero_ecommerce": "A-1"}},
                    {"pedido": {"id": 11, "numero": 1002}}
                ]
            }
        }));
        let orders = response.orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].identifier, Some(10));
        assert_eq!(orders[0].number_store.as_deref(), Some("A-1"));
        assert_eq!(orders[1].number, Some(1002));
    }

    #[test]
    fn labels_are_collected() {
        let response = TinyResponse::from_json(json!({
            "retorno": {"links": [{"link": "https://x/a.pdf"}, {"link": ""}, "https://x/b.zip"]}
        }));
        assert_eq!(response.labels(), vec!["https://x/a.pdf", "https://x/b.zip"]);
    }

    #[test]
    fn invoice_xml_from_json_string() {
        let response = TinyResponse::from_json(json!({"retorno": {"xml_nfe": "<nfeProc>1</nfeProc>"}}));
        assert_eq!(
            response.invoice_xml().unwrap().as_deref(),
            Some(r#"<?xml version="1.0" encoding="UTF-8"?><nfeProc>1</nfeProc>"#)
        );
    }

    #[test]
    fn invoice_xml_from_raw_body() {
        let body = b"<retorno><status>OK</status><xml_nfe><nfeProc versao=\"4.00\"><NFe>x</NFe></nfeProc></xml_nfe></retorno>";
        let response = TinyResponse::from_bytes(body);
        assert!(!response.has_error());
        assert_eq!(
            response.invoice_xml().unwrap().as_deref(),
            Some(r#"<?xml version="1.0" encoding="UTF-8"?><nfeProc versao="4.00"><NFe>x</NFe></nfeProc>"#)
        );
    }

    #[test]
    fn raw_xml_error() {
        let body = b"<retorno><status>Erro</status><erros><erro>Nota inexistente</erro></erros></retorno>";
        let response = TinyResponse::from_bytes(body);
        assert!(response.has_error());
        assert_eq!(response.error_message().as_deref(), Some("Nota inexistente"));
        assert!(response.invoice_xml().unwrap().is_none());
    }

    #[test]
    fn latin1_body_is_decoded() {
        let body = b"<retorno><erro>Situa\xe7\xe3o</erro></retorno>";
        let response = TinyResponse::from_bytes(body);
        assert_eq!(response.raw(), Some("<retorno><erro>Situação</erro></retorno>"));
    }
}
