//! Message automation: opt-out and intent detection, auto-replies
//!
//! Detection is keyword based, case-insensitive and whole-word: "stop"
//! matches "STOP" and "please stop now" but not "shopstop". Button payloads
//! take priority over free text.

use std::collections::HashMap;

use crate::contracts::{ActionIntent, Button};

/// Kinds of auto-replies the engine can queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoReplyType {
    Welcome,
    Received,
    OptOutConfirmed,
    HumanRequested,
}

/// Result of keyword/intent detection on one message
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub is_optout: bool,
    pub optout_keyword: Option<String>,
    pub intent: Option<ActionIntent>,
    pub intent_keyword: Option<String>,
}

/// An auto-reply chosen for an inbound message
#[derive(Debug, Clone)]
pub struct AutoReply {
    pub reply_type: AutoReplyType,
    pub text: String,
    pub buttons: Option<Vec<Button>>,
}

const OPTOUT_KEYWORDS: &[&str] = &[
    "stop",
    "sair",
    "cancelar",
    "remover",
    "unsubscribe",
    "parar",
    "nao quero mais",
    "não quero mais",
];

const QUOTE_KEYWORDS: &[&str] = &[
    "cotacao",
    "cotação",
    "orcamento",
    "orçamento",
    "preco",
    "preço",
    "quanto custa",
    "valor",
];

const STATUS_KEYWORDS: &[&str] = &[
    "status",
    "pedido",
    "entrega",
    "rastrear",
    "acompanhar",
    "onde esta",
    "onde está",
    "meu pedido",
];

const HUMAN_KEYWORDS: &[&str] = &[
    "atendente",
    "humano",
    "pessoa",
    "falar com alguem",
    "falar com alguém",
    "ajuda",
    "help",
    "suporte",
];

/// Whole-word, case-insensitive keyword match (multi-word keywords included)
fn matches_keyword(text_lower: &str, keyword: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text_lower[start..].find(keyword) {
        let begin = start + pos;
        let end = begin + keyword.len();

        let boundary_before = text_lower[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let boundary_after = text_lower[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());

        if boundary_before && boundary_after {
            return true;
        }

        start = begin
            + text_lower[begin..]
                .chars()
                .next()
                .map_or(1, |c| c.len_utf8());
    }
    false
}

/// Keyword/intent automation engine
///
/// Keyword sets and reply templates can be overridden per deployment; the
/// defaults cover the Brazilian-Portuguese command vocabulary plus the
/// universal "stop"/"unsubscribe".
pub struct AutomationEngine {
    optout_keywords: Vec<String>,
    intent_keywords: Vec<(ActionIntent, Vec<String>)>,
    button_intents: HashMap<String, ActionIntent>,
    replies: HashMap<AutoReplyType, String>,
}

impl Default for AutomationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AutomationEngine {
    pub fn new() -> Self {
        let to_strings = |slice: &[&str]| slice.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let mut button_intents = HashMap::new();
        for (id, intent) in [
            ("btn_quote", ActionIntent::CreateQuote),
            ("btn_status", ActionIntent::OrderStatus),
            ("btn_human", ActionIntent::TalkToHuman),
            ("create_quote", ActionIntent::CreateQuote),
            ("order_status", ActionIntent::OrderStatus),
            ("talk_to_human", ActionIntent::TalkToHuman),
        ] {
            button_intents.insert(id.to_string(), intent);
        }

        let mut replies = HashMap::new();
        replies.insert(
            AutoReplyType::Welcome,
            "Olá! Bem-vindo ao {business_name}. Como posso ajudar você hoje?".to_string(),
        );
        replies.insert(
            AutoReplyType::Received,
            "Mensagem recebida! Um vendedor vai te responder em breve.".to_string(),
        );
        replies.insert(
            AutoReplyType::OptOutConfirmed,
            "Você foi removido da nossa lista de mensagens. Se mudar de ideia, é só nos enviar uma mensagem.".to_string(),
        );
        replies.insert(
            AutoReplyType::HumanRequested,
            "Entendi! Um atendente vai entrar em contato com você em breve.".to_string(),
        );

        Self {
            optout_keywords: to_strings(OPTOUT_KEYWORDS),
            intent_keywords: vec![
                (ActionIntent::CreateQuote, to_strings(QUOTE_KEYWORDS)),
                (ActionIntent::OrderStatus, to_strings(STATUS_KEYWORDS)),
                (ActionIntent::TalkToHuman, to_strings(HUMAN_KEYWORDS)),
            ],
            button_intents,
            replies,
        }
    }

    /// Detect opt-out or intent from a message.
    ///
    /// Button payloads win over text; opt-out wins over intents.
    pub fn detect(&self, text: Option<&str>, button_payload: Option<&str>) -> DetectionResult {
        let mut result = DetectionResult::default();

        if let Some(payload) = button_payload {
            if let Some(intent) = self.button_intents.get(payload) {
                result.intent = Some(*intent);
                result.intent_keyword = Some(payload.to_string());
                return result;
            }
        }

        let Some(text) = text else {
            return result;
        };
        let text_lower = text.to_lowercase();

        for keyword in &self.optout_keywords {
            if matches_keyword(&text_lower, keyword) {
                result.is_optout = true;
                result.optout_keyword = Some(keyword.clone());
                return result;
            }
        }

        for (intent, keywords) in &self.intent_keywords {
            for keyword in keywords {
                if matches_keyword(&text_lower, keyword) {
                    result.intent = Some(*intent);
                    result.intent_keyword = Some(keyword.clone());
                    return result;
                }
            }
        }

        result
    }

    /// Decide whether (and which) auto-reply to queue
    pub fn should_auto_reply(
        &self,
        is_new_conversation: bool,
        detection: &DetectionResult,
        auto_reply_enabled: bool,
    ) -> Option<AutoReplyType> {
        if detection.is_optout {
            return Some(AutoReplyType::OptOutConfirmed);
        }
        if detection.intent == Some(ActionIntent::TalkToHuman) {
            return Some(AutoReplyType::HumanRequested);
        }
        if is_new_conversation {
            return Some(AutoReplyType::Welcome);
        }
        if auto_reply_enabled {
            return Some(AutoReplyType::Received);
        }
        None
    }

    /// Build the auto-reply, substituting `{variable}` placeholders
    pub fn auto_reply(
        &self,
        reply_type: AutoReplyType,
        variables: &HashMap<String, String>,
    ) -> AutoReply {
        let template = self.replies.get(&reply_type).cloned().unwrap_or_default();
        let mut text = template;
        for (key, value) in variables {
            text = text.replace(&format!("{{{key}}}"), value);
        }

        let buttons = matches!(reply_type, AutoReplyType::Welcome | AutoReplyType::Received)
            .then(Self::default_buttons);

        AutoReply {
            reply_type,
            text,
            buttons,
        }
    }

    /// Quick-reply buttons offered on welcome/acknowledgment replies
    pub fn default_buttons() -> Vec<Button> {
        vec![
            Button {
                id: "btn_quote".to_string(),
                title: "Fazer cotação".to_string(),
            },
            Button {
                id: "btn_status".to_string(),
                title: "Status do pedido".to_string(),
            },
            Button {
                id: "btn_human".to_string(),
                title: "Falar com atendente".to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optout_is_case_insensitive() {
        let engine = AutomationEngine::new();
        let detection = engine.detect(Some("STOP"), None);
        assert!(detection.is_optout);
        assert_eq!(detection.optout_keyword.as_deref(), Some("stop"));
    }

    #[test]
    fn test_optout_requires_word_boundary() {
        let engine = AutomationEngine::new();
        assert!(!engine.detect(Some("nonstop shopping"), None).is_optout);
        assert!(engine.detect(Some("please stop now"), None).is_optout);
    }

    #[test]
    fn test_multiword_optout_keyword() {
        let engine = AutomationEngine::new();
        assert!(engine.detect(Some("eu não quero mais receber"), None).is_optout);
    }

    #[test]
    fn test_accented_keyword_matches() {
        let engine = AutomationEngine::new();
        let detection = engine.detect(Some("quero um orçamento"), None);
        assert_eq!(detection.intent, Some(ActionIntent::CreateQuote));
    }

    #[test]
    fn test_button_payload_wins_over_text() {
        let engine = AutomationEngine::new();
        let detection = engine.detect(Some("stop"), Some("btn_status"));
        assert!(!detection.is_optout);
        assert_eq!(detection.intent, Some(ActionIntent::OrderStatus));
    }

    #[test]
    fn test_unknown_button_falls_back_to_text() {
        let engine = AutomationEngine::new();
        let detection = engine.detect(Some("quanto custa o cimento?"), Some("btn_mystery"));
        assert_eq!(detection.intent, Some(ActionIntent::CreateQuote));
    }

    #[test]
    fn test_status_intent() {
        let engine = AutomationEngine::new();
        let detection = engine.detect(Some("onde está meu pedido"), None);
        assert_eq!(detection.intent, Some(ActionIntent::OrderStatus));
    }

    #[test]
    fn test_human_intent_gets_acknowledgment_reply() {
        let engine = AutomationEngine::new();
        let detection = engine.detect(Some("quero falar com atendente"), None);
        assert_eq!(detection.intent, Some(ActionIntent::TalkToHuman));
        assert_eq!(
            engine.should_auto_reply(false, &detection, true),
            Some(AutoReplyType::HumanRequested)
        );
    }

    #[test]
    fn test_auto_reply_decision_matrix() {
        let engine = AutomationEngine::new();
        let nothing = DetectionResult::default();

        // New conversation → welcome, regardless of the tenant toggle
        assert_eq!(
            engine.should_auto_reply(true, &nothing, false),
            Some(AutoReplyType::Welcome)
        );
        // Existing conversation with auto-reply on → acknowledgment
        assert_eq!(
            engine.should_auto_reply(false, &nothing, true),
            Some(AutoReplyType::Received)
        );
        // Existing conversation with auto-reply off → silence
        assert_eq!(engine.should_auto_reply(false, &nothing, false), None);

        let optout = DetectionResult {
            is_optout: true,
            ..Default::default()
        };
        assert_eq!(
            engine.should_auto_reply(false, &optout, false),
            Some(AutoReplyType::OptOutConfirmed)
        );
    }

    #[test]
    fn test_variable_substitution_and_buttons() {
        let engine = AutomationEngine::new();
        let mut vars = HashMap::new();
        vars.insert("business_name".to_string(), "Depósito União".to_string());

        let reply = engine.auto_reply(AutoReplyType::Welcome, &vars);
        assert!(reply.text.contains("Depósito União"));
        assert_eq!(reply.buttons.as_ref().map(Vec::len), Some(3));

        let reply = engine.auto_reply(AutoReplyType::OptOutConfirmed, &HashMap::new());
        assert!(reply.buttons.is_none());
    }
}
