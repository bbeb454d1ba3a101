use async_trait::async_trait;
use caixa_core::{DateRange, ErpAccountId, LedgerEntry, LedgerStatus, Money, NewLedgerEntry};
use chrono::NaiveDate;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{ErpCategory, ErpClient, ErpError};

pub const OMIE_BASE_URL: &str = "https://app.omie.com.br/api/v1";

const DATE_FORMAT: &str = "%d/%m/%Y";
const CATEGORIES_PAGE_SIZE: u32 = 500;
/// Opening-balance pseudo entries in the statement listing.
const BALANCE_ROWS: [&str; 2] = ["SALDO ANTERIOR", "SALDO INICIAL"];

#[derive(Debug, Clone)]
pub struct OmieConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_secret: String,
    pub timeout: Duration,
}

impl OmieConfig {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            base_url: OMIE_BASE_URL.to_string(),
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Omie's JSON-over-HTTP API. Every call is a POST of
/// `{call, app_key, app_secret, param: [..]}` to a per-resource endpoint.
#[derive(Debug, Clone)]
pub struct OmieClient {
    http: reqwest::Client,
    config: OmieConfig,
    account: Option<ErpAccountId>,
}

#[derive(Serialize)]
struct OmieRequest<'a, P> {
    call: &'a str,
    app_key: &'a str,
    app_secret: &'a str,
    param: [P; 1],
}

impl OmieClient {
    pub fn new(config: OmieConfig) -> Result<Self, ErpError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ErpError::Connectivity(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            account: None,
        })
    }

    pub fn account(&self) -> Option<ErpAccountId> {
        self.account
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        call: &str,
        param: P,
    ) -> Result<R, ErpError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let request = OmieRequest {
            call,
            app_key: &self.config.app_key,
            app_secret: &self.config.app_secret,
            param: [param],
        };

        debug!(%url, call, "Calling Omie");
        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        decode_response(status.as_u16(), body)
    }

    async fn categories_page(&self, page: u32) -> Result<CategoriesPage, ErpError> {
        self.call(
            "geral/categorias/",
            "ListarCategorias",
            serde_json::json!({ "pagina": page, "registros_por_pagina": CATEGORIES_PAGE_SIZE }),
        )
        .await
    }
}

/// Omie reports failures as `{"faultstring": .., "faultcode": ..}`, usually
/// with HTTP 500, so the body is inspected before the status.
fn decode_response<R: DeserializeOwned>(status: u16, body: serde_json::Value) -> Result<R, ErpError> {
    if let Some(fault) = body.get("faultstring").and_then(|f| f.as_str()) {
        return Err(ErpError::Api(fault.to_string()));
    }
    if !(200..300).contains(&status) {
        return Err(ErpError::Api(format!("HTTP {status}")));
    }
    serde_json::from_value(body).map_err(|e| ErpError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ErpClient for OmieClient {
    async fn set_account_id(&mut self, account: ErpAccountId) -> Result<(), ErpError> {
        self.account = Some(account);
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        account: ErpAccountId,
        range: DateRange,
    ) -> Result<Vec<LedgerEntry>, ErpError> {
        let response: ExtratoResponse = self
            .call(
                "financas/extrato/",
                "ListarExtrato",
                ExtratoParams {
                    n_cod_cc: account.0,
                    d_periodo_inicial: range.start.format(DATE_FORMAT).to_string(),
                    d_periodo_final: range.end.format(DATE_FORMAT).to_string(),
                },
            )
            .await?;

        let raw = response.lista_movimentos.len();
        let entries: Vec<LedgerEntry> = response
            .lista_movimentos
            .iter()
            .filter_map(|m| m.to_entry(account))
            .filter(|e| range.contains(e.date))
            .collect();

        info!(
            account = %account,
            %range,
            raw,
            entries = entries.len(),
            "Fetched Omie statement entries"
        );
        Ok(entries)
    }

    async fn create_ledger_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, ErpError> {
        let account = self.account.unwrap_or(entry.account_id);
        let response: IncluirResponse = self
            .call(
                "financas/contacorrentelancamentos/",
                "IncluirLancCC",
                IncluirLancCC::from_entry(account, entry),
            )
            .await?;

        if response.c_cod_status.as_deref().unwrap_or("0") != "0" {
            return Err(ErpError::Api(
                response
                    .c_des_status
                    .unwrap_or_else(|| "entry rejected".to_string()),
            ));
        }
        let id = response
            .n_cod_lanc
            .ok_or_else(|| ErpError::InvalidResponse("IncluirLancCC returned no nCodLanc".into()))?;

        info!(id, integration_code = %entry.integration_code, "Created Omie ledger entry");
        Ok(entry.clone().into_entry(id))
    }

    async fn list_categories(&self) -> Result<Vec<ErpCategory>, ErpError> {
        let mut categories = Vec::new();
        let mut page = 1;
        loop {
            let response = self.categories_page(page).await?;
            categories.extend(
                response
                    .categoria_cadastro
                    .into_iter()
                    .filter(|c| !c.codigo.is_empty())
                    .map(|c| ErpCategory {
                        code: c.codigo,
                        description: c.descricao,
                    }),
            );
            if page >= response.total_de_paginas.unwrap_or(1) {
                break;
            }
            page += 1;
        }
        debug!(count = categories.len(), "Fetched Omie categories");
        Ok(categories)
    }
}

// ── wire types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ExtratoParams {
    #[serde(rename = "nCodCC")]
    n_cod_cc: i64,
    #[serde(rename = "dPeriodoInicial")]
    d_periodo_inicial: String,
    #[serde(rename = "dPeriodoFinal")]
    d_periodo_final: String,
}

#[derive(Debug, Deserialize)]
struct ExtratoResponse {
    #[serde(rename = "listaMovimentos", default)]
    lista_movimentos: Vec<ExtratoMovimento>,
}

#[derive(Debug, Deserialize)]
struct ExtratoMovimento {
    #[serde(rename = "nCodLancamento", default)]
    n_cod_lancamento: Option<i64>,
    #[serde(rename = "dDataLancamento", default)]
    d_data_lancamento: String,
    #[serde(rename = "nValorDocumento", default)]
    n_valor_documento: f64,
    #[serde(rename = "cDesCliente", default)]
    c_des_cliente: String,
    #[serde(rename = "cDesCategoria", default)]
    c_des_categoria: String,
    #[serde(rename = "cNumero", default, deserialize_with = "string_or_number")]
    c_numero: String,
    #[serde(rename = "cObservacoes", default)]
    c_observacoes: String,
    #[serde(rename = "cSituacao", default)]
    c_situacao: String,
}

impl ExtratoMovimento {
    /// Skips balance rows, zero amounts and rows without a usable date or id.
    fn to_entry(&self, account: ErpAccountId) -> Option<LedgerEntry> {
        if BALANCE_ROWS.contains(&self.c_des_cliente.trim()) {
            return None;
        }
        let date = NaiveDate::parse_from_str(self.d_data_lancamento.trim(), DATE_FORMAT).ok()?;
        let amount = Money::from_decimal(Decimal::from_f64(self.n_valor_documento)?);
        if amount.is_zero() {
            return None;
        }

        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };

        Some(LedgerEntry {
            id: self.n_cod_lancamento?,
            date,
            amount,
            account_id: account,
            category: non_empty(&self.c_des_categoria),
            client: non_empty(&self.c_des_cliente),
            document_number: non_empty(&self.c_numero),
            description: self.c_observacoes.trim().to_string(),
            status: if self.c_situacao.trim() == "Conciliado" {
                LedgerStatus::Reconciled
            } else {
                LedgerStatus::Open
            },
        })
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Serialize)]
struct IncluirLancCC {
    #[serde(rename = "cCodIntLanc")]
    c_cod_int_lanc: String,
    cabecalho: Cabecalho,
    detalhes: Detalhes,
}

#[derive(Debug, Serialize)]
struct Cabecalho {
    #[serde(rename = "nCodCC")]
    n_cod_cc: i64,
    #[serde(rename = "dDtLanc")]
    d_dt_lanc: String,
    #[serde(rename = "nValorLanc")]
    n_valor_lanc: f64,
}

#[derive(Debug, Serialize)]
struct Detalhes {
    #[serde(rename = "cCodCateg")]
    c_cod_categ: String,
    #[serde(rename = "cTipo")]
    c_tipo: &'static str,
    #[serde(rename = "cNumDoc")]
    c_num_doc: String,
    #[serde(rename = "cObs")]
    c_obs: String,
}

impl IncluirLancCC {
    fn from_entry(account: ErpAccountId, entry: &NewLedgerEntry) -> Self {
        let observation: String = format!("Importado OFX - {}", entry.description)
            .chars()
            .take(200)
            .collect();
        Self {
            c_cod_int_lanc: entry.integration_code.clone(),
            cabecalho: Cabecalho {
                n_cod_cc: account.0,
                d_dt_lanc: entry.date.format(DATE_FORMAT).to_string(),
                n_valor_lanc: entry.amount.abs().as_decimal().to_f64().unwrap_or_default(),
            },
            detalhes: Detalhes {
                c_cod_categ: entry.category.clone(),
                c_tipo: "DIN",
                c_num_doc: entry.document_number.clone(),
                c_obs: observation,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct IncluirResponse {
    #[serde(rename = "nCodLanc")]
    n_cod_lanc: Option<i64>,
    #[serde(rename = "cCodStatus", default, deserialize_with = "optional_string_or_number")]
    c_cod_status: Option<String>,
    #[serde(rename = "cDesStatus")]
    c_des_status: Option<String>,
}

fn optional_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let s = string_or_number(deserializer)?;
    Ok((!s.is_empty()).then_some(s))
}

#[derive(Debug, Deserialize)]
struct CategoriesPage {
    #[serde(default)]
    total_de_paginas: Option<u32>,
    #[serde(default)]
    categoria_cadastro: Vec<CategoriaCadastro>,
}

#[derive(Debug, Deserialize)]
struct CategoriaCadastro {
    #[serde(default)]
    codigo: String,
    #[serde(default)]
    descricao: String,
}
