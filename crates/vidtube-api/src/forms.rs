use std::collections::HashMap;

use axum::extract::Multipart;
use bytes::Bytes;

use crate::error::ApiError;

/// A file part from a multipart request, held in memory until it is staged.
#[derive(Debug)]
pub struct FormFile {
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// Text and file parts of a multipart body, keyed by field name.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, FormFile>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = MultipartForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::validation(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            if let Some(file_name) = field.file_name().map(str::to_owned) {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::validation(e.body_text()))?;
                // Browsers send an empty part for an untouched file input
                if data.is_empty() {
                    continue;
                }
                let file_name = (!file_name.is_empty()).then_some(file_name);
                form.files.insert(name, FormFile { file_name, data });
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation(e.body_text()))?;
                form.fields.insert(name, text);
            }
        }

        Ok(form)
    }

    /// Trimmed text value, empty when the field was not sent.
    pub fn text(&self, name: &str) -> &str {
        self.fields.get(name).map(|s| s.trim()).unwrap_or("")
    }

    /// Value exactly as sent. Passwords go through here.
    pub fn raw(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn take_file(&mut self, name: &str) -> Option<FormFile> {
        self.files.remove(name)
    }
}
