//! Routing category catalog.
//!
//! Categories are immutable after load and keep their load order — the
//! classifier's tie-break ("first category in catalog order wins") depends
//! on it. The default catalog mirrors the production routing table; a JSON
//! file can override it via `CATALOG_PATH`.

use serde::{Deserialize, Serialize};

/// A routing bucket: keywords, priority weight, notification targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// Unique key, also used in chat callback data (e.g. `financeiro`).
    pub key: String,
    /// Human-readable name, shown to users and in email subjects.
    pub display_name: String,
    /// Keywords matched as substrings of the lower-cased message.
    pub keywords: Vec<String>,
    /// Weight added per keyword hit when scoring.
    pub priority: u32,
    /// Email addresses notified when a ticket lands in this category.
    pub notify_targets: Vec<String>,
    /// Catch-all marker. Kept as catalog metadata; the scoring tie-break
    /// itself is catalog order (see `classify`).
    #[serde(default)]
    pub wildcard: bool,
}

/// Ordered set of categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCatalog {
    categories: Vec<Category>,
}

impl CategoryCatalog {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    /// Load a catalog from a JSON document (array of categories).
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        let categories: Vec<Category> = serde_json::from_str(data)?;
        Ok(Self { categories })
    }

    pub fn get(&self, key: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.key == key)
    }

    /// Display name for a key, falling back to the key itself.
    pub fn display_name(&self, key: &str) -> String {
        self.get(key)
            .map(|c| c.display_name.clone())
            .unwrap_or_else(|| key.to_string())
    }

    /// Iterate categories in catalog (load) order.
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// The production routing table.
    pub fn default_catalog() -> Self {
        fn cat(
            key: &str,
            display_name: &str,
            priority: u32,
            keywords: &[&str],
            targets: &[&str],
        ) -> Category {
            Category {
                key: key.into(),
                display_name: display_name.into(),
                keywords: keywords.iter().map(|s| (*s).to_string()).collect(),
                priority,
                notify_targets: targets.iter().map(|s| (*s).to_string()).collect(),
                wildcard: false,
            }
        }

        let mut categories = vec![
            cat(
                "estoque_logistica",
                "Estoque/Logística",
                3,
                &[
                    "rastreio",
                    "rastrear",
                    "pedido",
                    "entrega",
                    "transportadora",
                    "prazo",
                    "atraso",
                    "envio",
                    "remessa",
                    "comprovante",
                    "mercadoria",
                    "chegou",
                    "não chegou",
                    "onde está",
                ],
                &[
                    "logistica@galtecom.com.br",
                    "estoque@galtecom.com.br",
                    "financeiro@galtecom.com.br",
                ],
            ),
            cat(
                "financeiro",
                "Financeiro",
                2,
                &[
                    "segunda via",
                    "boleto",
                    "prorrogação",
                    "pagamento",
                    "fatura",
                    "cobrança",
                    "vencimento",
                    "boletos",
                    "títulos",
                    "prorrogar",
                    "dias",
                ],
                &[
                    "contabil@galtecom.com.br",
                    "contabil.nav@galtecom.com.br",
                    "financeiro@galtecom.com.br",
                ],
            ),
            cat(
                "comercial",
                "Comercial",
                1,
                &[
                    "preços",
                    "concorrência",
                    "acordado",
                    "faturou",
                    "bonificação",
                    "compensar",
                    "valor",
                    "reclamando",
                    "rádios",
                    "próximo pedido",
                ],
                &["gfurtado@galtecom.com.br", "financeiro@galtecom.com.br"],
            ),
            cat(
                "marketing",
                "Marketing",
                3,
                &[
                    "fotos",
                    "vídeos",
                    "produto",
                    "flyers",
                    "lançamento",
                    "fundo branco",
                    "diferenciais",
                    "câmeras",
                    "imagens",
                    "material",
                    "kc360",
                    "krc1610",
                ],
                &[
                    "marketing@galtecom.com.br",
                    "marketing.nav@galtecom.com.br",
                    "gfurtado@galtecom.com.br",
                ],
            ),
            cat(
                "diretoria",
                "Diretoria",
                1,
                &[
                    "reunião",
                    "diretoria",
                    "proprietário",
                    "insatisfeito",
                    "resolver",
                    "situação",
                    "diretor",
                    "dono",
                    "gerência",
                ],
                &[
                    "edson@galtecom.com.br",
                    "financeiro@galtecom.com.br",
                    "gfurtado@galtecom.com.br",
                ],
            ),
            cat(
                "engenharia",
                "Engenharia/Desenvolvimento",
                1,
                &[
                    "manual",
                    "instalação",
                    "dificuldades",
                    "sensor",
                    "problemas",
                    "funcionamento",
                    "técnico",
                    "especificação",
                    "configuração",
                    "krc5000",
                    "kxs199a",
                    "krc4100",
                ],
                &[
                    "engenharia@galtecom.com.br",
                    "desenvolvimento@galtecom.com.br",
                ],
            ),
            cat(
                "faturamento",
                "Faturamento",
                1,
                &[
                    "cfop",
                    "cst",
                    "faturou",
                    "correto",
                    "questionando",
                    "nota fiscal",
                    "6202",
                    "6308",
                    "fiscal",
                    "tributário",
                ],
                &["adm@galtecom.com.br", "financeiro@galtecom.com.br"],
            ),
            cat(
                "garantia",
                "Garantia",
                1,
                &[
                    "garantia",
                    "aparelhos",
                    "prazo",
                    "1 ano",
                    "defeito",
                    "troca",
                    "reparo",
                    "fora do prazo",
                    "garantir",
                ],
                &[
                    "garantia@galtecom.com.br",
                    "garantia1@galtecom.com.br",
                    "edson@galtecom.com.br",
                ],
            ),
        ];

        // Financeiro doubles as the catch-all bucket.
        if let Some(fin) = categories.iter_mut().find(|c| c.key == "financeiro") {
            fin.wildcard = true;
        }

        Self { categories }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_eight_categories() {
        let catalog = CategoryCatalog::default_catalog();
        assert_eq!(catalog.len(), 8);
    }

    #[test]
    fn default_catalog_preserves_order() {
        let catalog = CategoryCatalog::default_catalog();
        let keys: Vec<&str> = catalog.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys[0], "estoque_logistica");
        assert_eq!(keys[1], "financeiro");
        assert_eq!(keys[7], "garantia");
    }

    #[test]
    fn get_by_key() {
        let catalog = CategoryCatalog::default_catalog();
        let cat = catalog.get("financeiro").unwrap();
        assert_eq!(cat.display_name, "Financeiro");
        assert_eq!(cat.priority, 2);
        assert!(cat.wildcard);
        assert!(catalog.get("nope").is_none());
    }

    #[test]
    fn display_name_falls_back_to_key() {
        let catalog = CategoryCatalog::default_catalog();
        assert_eq!(catalog.display_name("garantia"), "Garantia");
        assert_eq!(catalog.display_name("unknown_key"), "unknown_key");
    }

    #[test]
    fn every_category_has_notify_targets() {
        let catalog = CategoryCatalog::default_catalog();
        for cat in catalog.iter() {
            assert!(
                !cat.notify_targets.is_empty(),
                "{} has no notify targets",
                cat.key
            );
            assert!(!cat.keywords.is_empty(), "{} has no keywords", cat.key);
            assert!(cat.priority > 0);
        }
    }

    #[test]
    fn from_json_roundtrip() {
        let json = r#"[
            {
                "key": "suporte",
                "display_name": "Suporte",
                "keywords": ["ajuda", "dúvida"],
                "priority": 2,
                "notify_targets": ["suporte@example.com"]
            }
        ]"#;
        let catalog = CategoryCatalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 1);
        let cat = catalog.get("suporte").unwrap();
        assert_eq!(cat.priority, 2);
        assert!(!cat.wildcard, "wildcard defaults to false");
    }

    #[test]
    fn from_json_rejects_malformed() {
        assert!(CategoryCatalog::from_json("{not json").is_err());
    }
}
