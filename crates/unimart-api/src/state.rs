use std::sync::Arc;

use unimart_chat::ChatAggregator;
use unimart_db::Database;
use unimart_realtime::dispatcher::Dispatcher;

use crate::sources::{ConversationSource, DbPresence, ExchangeChatSource, ProductChannelSource};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub aggregator: ChatAggregator,
}

impl AppStateInner {
    /// State with the storage-backed chat sources registered. Registration
    /// order decides which copy of a duplicated chat wins.
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, jwt_secret: impl Into<String>) -> AppState {
        let aggregator = ChatAggregator::new()
            .with_source(Arc::new(ConversationSource::new(db.clone())))
            .with_source(Arc::new(ProductChannelSource::new(db.clone())))
            .with_source(Arc::new(ExchangeChatSource::new(db.clone())))
            .with_presence(Arc::new(DbPresence::new(db.clone(), dispatcher.clone())));

        Arc::new(Self {
            db,
            dispatcher,
            jwt_secret: jwt_secret.into(),
            aggregator,
        })
    }
}
