pub mod chat_llm;
pub mod credentials;
pub mod image_files;
pub mod image_llm;
pub mod json_store;
pub mod notifier;
pub mod pg_store;

pub use chat_llm::OpenAiChatAdapter;
pub use credentials::FileCredentialStore;
pub use image_files::LocalImageStorage;
pub use image_llm::OpenAiImageAdapter;
pub use json_store::JsonFileStore;
pub use notifier::LogNotifier;
pub use pg_store::PgUserStore;
