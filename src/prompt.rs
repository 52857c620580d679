//! Prompt construction for the language model.
//!
//! Retrieved chunks are labelled by position and joined into one context
//! block, which is spliced into a fixed English or Spanish instruction
//! template.

use crate::models::RetrievalHit;

/// Context text used when retrieval produced nothing.
pub const EMPTY_CONTEXT: &str = "No specific context available.";

/// Reply language. Only `es` selects Spanish; every other tag is English.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Spanish,
}

impl Language {
    pub fn from_tag(tag: &str) -> Self {
        if tag == "es" {
            Language::Spanish
        } else {
            Language::English
        }
    }
}

/// Join non-empty chunk contents as `Context {i}: {text}`, numbered from 1
/// by position in `hits`.
pub fn build_context_text(hits: &[RetrievalHit]) -> String {
    if hits.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    hits.iter()
        .enumerate()
        .filter(|(_, hit)| !hit.content.is_empty())
        .map(|(i, hit)| format!("Context {}: {}", i + 1, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn create_prompt(user_message: &str, context: &str, language: Language) -> String {
    match language {
        Language::Spanish => format!(
            "Eres un asistente experto en donación de sangre para America's Blood Centers. Responde en español basándote en el contexto proporcionado.

Contexto:
{context}

Pregunta del usuario: {user_message}

Instrucciones:
- Responde SOLO en español
- Usa la información del contexto proporcionado
- Si la pregunta es sobre ubicaciones de donación, menciona el localizador de centros de sangre
- Sé preciso y útil
- Si no tienes información suficiente en el contexto, dilo claramente
- Usa formato markdown cuando sea apropiado (listas, texto en negrita, etc.)
- Organiza la información de manera clara y fácil de leer

Respuesta:"
        ),
        Language::English => format!(
            "You are an expert blood donation assistant for America's Blood Centers. Answer based on the provided context.

Context:
{context}

User question: {user_message}

Instructions:
- Answer based on the provided context
- If asked about donation locations, mention the blood center locator
- Be accurate and helpful
- If you don't have sufficient information in the context, say so clearly
- Focus on blood donation, eligibility, and America's Blood Centers information
- Use markdown formatting when appropriate (lists, bold text, etc.)
- Organize information clearly and make it easy to read

Answer:"
        ),
    }
}

/// Sentence returned in place of an answer when the model call fails.
pub fn fallback_response(language: Language) -> &'static str {
    match language {
        Language::Spanish => "Lo siento, tengo problemas para responder en este momento. Por favor, inténtalo de nuevo más tarde o contacta directamente a America's Blood Centers.",
        Language::English => "I'm sorry, I'm having trouble responding right now. Please try again later or contact America's Blood Centers directly.",
    }
}
