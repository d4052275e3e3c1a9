//! Tipos de dados para requisições e respostas do endpoint de chat completions.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato compatível com a OpenAI usado pelo serviço de geração.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para o endpoint de chat completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Identificador do modelo (ex.: "deepseek-ai/DeepSeek-V3").
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Número máximo de tokens na resposta.
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl ChatRequest {
    /// Requisição de uma única mensagem de usuário com os parâmetros de geração padrão.
    pub fn single_turn(model: &str, prompt: String) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: prompt,
            }],
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.7,
        }
    }
}

/// Uma única mensagem em uma conversa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Papel do remetente: "system", "user" ou "assistant".
    pub role: String,
    pub content: String,
}

/// Resposta retornada pelo endpoint de chat completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub model: String,
    /// Estatísticas de uso de tokens, quando o provedor as envia.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Texto da primeira escolha, se houver.
    pub fn text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Estatísticas de consumo de tokens para uma chamada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Um par pergunta/resposta validado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Formato JSON que o modelo deve devolver no texto da resposta.
#[derive(Debug, Deserialize)]
pub(crate) struct QaEnvelope {
    pub qa_pairs: Option<Vec<RawPair>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPair {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
}
