use super::*;

use teloxide::net::Download;

/// Outbound side of the messaging platform as seen by the flow handlers.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    async fn post_text(&self, chat_id: ChatId, text: &str) -> Result<MessageId>;

    async fn post_menu(
        &self,
        chat_id: ChatId,
        text: &str,
        menu: InlineKeyboardMarkup,
    ) -> Result<MessageId>;

    async fn replace_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()>;

    async fn replace_menu(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        menu: InlineKeyboardMarkup,
    ) -> Result<()>;

    async fn deliver_video(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<()>;

    async fn remove_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;

    async fn ack_callback(&self, query_id: &str, text: Option<&str>) -> Result<()>;

    async fn fetch_file(&self, file_id: &str, dest: &Path) -> Result<()>;
}

fn is_message_not_modified_error(err: &teloxide::RequestError) -> bool {
    err.to_string()
        .to_ascii_lowercase()
        .contains("message is not modified")
}

#[async_trait]
impl Transport for Bot {
    async fn post_text(&self, chat_id: ChatId, text: &str) -> Result<MessageId> {
        let sent = self.send_message(chat_id, text).await?;
        Ok(sent.id)
    }

    async fn post_menu(
        &self,
        chat_id: ChatId,
        text: &str,
        menu: InlineKeyboardMarkup,
    ) -> Result<MessageId> {
        let sent = self.send_message(chat_id, text).reply_markup(menu).await?;
        Ok(sent.id)
    }

    async fn replace_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        match self.edit_message_text(chat_id, message_id, text).await {
            Ok(_) => Ok(()),
            Err(err) if is_message_not_modified_error(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn replace_menu(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        menu: InlineKeyboardMarkup,
    ) -> Result<()> {
        match self
            .edit_message_text(chat_id, message_id, text)
            .reply_markup(menu)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_message_not_modified_error(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn deliver_video(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<()> {
        self.send_video(chat_id, InputFile::file(path.to_path_buf()))
            .caption(caption)
            .await?;
        Ok(())
    }

    async fn remove_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.delete_message(chat_id, message_id).await?;
        Ok(())
    }

    async fn ack_callback(&self, query_id: &str, text: Option<&str>) -> Result<()> {
        let request = self.answer_callback_query(query_id);
        match text {
            Some(text) => request.text(text).await?,
            None => request.await?,
        };
        Ok(())
    }

    async fn fetch_file(&self, file_id: &str, dest: &Path) -> Result<()> {
        let file = self.get_file(file_id).await?;
        let mut out = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        self.download_file(&file.path, &mut out).await?;
        Ok(())
    }
}
