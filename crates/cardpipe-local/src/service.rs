use crate::merge;
use crate::synthesis::SynthesisClient;
use cardpipe_core::{
    parse_http_url, Acquirer, CardStore, CardType, CompletionBackend, Error, KnowledgeCard,
    Result, SourceMaterial, UpdateFrequency,
};

/// Acquisition → synthesis → merge → store.
pub struct CardService<A, C, S> {
    acquirer: A,
    synthesis: SynthesisClient<C>,
    store: S,
}

impl<A, C, S> CardService<A, C, S>
where
    A: Acquirer,
    C: CompletionBackend,
    S: CardStore,
{
    pub fn new(acquirer: A, synthesis: SynthesisClient<C>, store: S) -> Self {
        Self {
            acquirer,
            synthesis,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn create(
        &self,
        topic: &str,
        material: SourceMaterial,
        tags: &[String],
        frequency: UpdateFrequency,
    ) -> Result<KnowledgeCard> {
        let synthesis = self.synthesis.generate(topic, &material).await?;
        let card = merge::from_synthesis(topic, &material, synthesis, tags, frequency);
        self.store.save(&card).await?;
        tracing::info!(card_id = %card.id, items = card.items.len(), "card created");
        Ok(card)
    }

    pub async fn create_from_website(
        &self,
        url: &str,
        tags: &[String],
        frequency: UpdateFrequency,
    ) -> Result<KnowledgeCard> {
        parse_http_url(url)?;
        let url = url.trim();
        let content = self.acquirer.scrape_website(url).await?;
        self.create(url, SourceMaterial::Website(content), tags, frequency)
            .await
    }

    pub async fn create_from_keyword(
        &self,
        keyword: &str,
        tags: &[String],
        frequency: UpdateFrequency,
    ) -> Result<KnowledgeCard> {
        let keyword = keyword.trim();
        let results = self.acquirer.search(keyword).await?;
        if results.is_empty() {
            tracing::warn!(keyword, "search returned no usable results");
        }
        self.create(keyword, SourceMaterial::Search(results), tags, frequency)
            .await
    }

    /// Re-acquire from the card's source and merge the refreshed content into it.
    pub async fn refresh(&self, card_id: &str) -> Result<KnowledgeCard> {
        let prior = self
            .store
            .get(card_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("card {card_id}")))?;

        let material = match prior.card_type {
            CardType::Website => {
                SourceMaterial::Website(self.acquirer.scrape_website(&prior.source).await?)
            }
            CardType::Keyword => SourceMaterial::Search(self.acquirer.search(prior.keyword()).await?),
        };
        let synthesis = self.synthesis.update(&prior, &material).await?;
        let card = merge::apply_update(&prior, synthesis);
        self.store.update(&card).await?;
        tracing::info!(card_id = %card.id, last_updated = card.last_updated, "card refreshed");
        Ok(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardpipe_core::{CompletionRequest, SearchResult, WebsiteContent};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAcquirer {
        fail: bool,
        searches: Mutex<Vec<String>>,
        scrapes: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Acquirer for FakeAcquirer {
        async fn search(&self, keyword: &str) -> Result<Vec<SearchResult>> {
            self.searches.lock().unwrap().push(keyword.to_string());
            if self.fail {
                return Err(Error::Connection("refused".into()));
            }
            Ok(vec![SearchResult {
                title: "T".into(),
                content: "C".into(),
                url: "https://a.test".into(),
            }])
        }

        async fn scrape_website(&self, url: &str) -> Result<WebsiteContent> {
            self.scrapes.lock().unwrap().push(url.to_string());
            Ok(WebsiteContent {
                title: "Example".into(),
                content: "{}".into(),
                url: url.to_string(),
            })
        }
    }

    struct Canned {
        reply: String,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl CompletionBackend for Canned {
        async fn complete(&self, _req: &CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    #[derive(Default)]
    struct MemStore {
        cards: Mutex<HashMap<String, KnowledgeCard>>,
    }

    #[async_trait::async_trait]
    impl CardStore for MemStore {
        async fn save(&self, card: &KnowledgeCard) -> Result<()> {
            self.cards.lock().unwrap().insert(card.id.clone(), card.clone());
            Ok(())
        }

        async fn get(&self, id: &str) -> Result<Option<KnowledgeCard>> {
            Ok(self.cards.lock().unwrap().get(id).cloned())
        }

        async fn update(&self, card: &KnowledgeCard) -> Result<()> {
            let mut cards = self.cards.lock().unwrap();
            if !cards.contains_key(&card.id) {
                return Err(Error::NotFound(card.id.clone()));
            }
            cards.insert(card.id.clone(), card.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.cards
                .lock()
                .unwrap()
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| Error::NotFound(id.to_string()))
        }
    }

    fn service(reply: &str, fail: bool) -> CardService<FakeAcquirer, Canned, MemStore> {
        CardService::new(
            FakeAcquirer {
                fail,
                ..Default::default()
            },
            SynthesisClient::new(Canned {
                reply: reply.to_string(),
                calls: AtomicU32::new(0),
            }),
            MemStore::default(),
        )
    }

    const REPLY: &str = r#"{"title": "Rust", "summary": "s", "items": [{"title": "a", "content": "b"}], "tags": ["ai", "tech"]}"#;

    #[tokio::test]
    async fn keyword_card_is_created_and_stored() {
        let svc = service(REPLY, false);
        let card = svc
            .create_from_keyword(" rust ", &["user".into()], UpdateFrequency::Daily)
            .await
            .unwrap();
        assert_eq!(card.source, "keyword:rust");
        assert_eq!(card.tags, vec!["ai".to_string(), "tech".to_string()]);
        assert_eq!(card.update_frequency, UpdateFrequency::Daily);
        assert_eq!(svc.store().get(&card.id).await.unwrap(), Some(card));
    }

    #[tokio::test]
    async fn website_card_validates_url_first() {
        let svc = service(REPLY, false);
        let err = svc
            .create_from_website("not a url", &[], UpdateFrequency::Weekly)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert!(svc.acquirer.scrapes.lock().unwrap().is_empty());

        let card = svc
            .create_from_website("https://example.com", &[], UpdateFrequency::Weekly)
            .await
            .unwrap();
        assert_eq!(card.card_type, CardType::Website);
        assert_eq!(card.source, "https://example.com");
    }

    #[tokio::test]
    async fn acquisition_failure_stops_the_pipeline() {
        let svc = service(REPLY, true);
        let err = svc
            .create_from_keyword("rust", &[], UpdateFrequency::Weekly)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(svc.synthesis_calls(), 0);
        assert!(svc.store().cards.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_completion_stores_nothing() {
        let svc = service("not-json", false);
        let err = svc
            .create_from_keyword("rust", &[], UpdateFrequency::Weekly)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedCompletion(_)));
        assert!(svc.store().cards.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_of_unknown_card_is_not_found() {
        let svc = service(REPLY, false);
        let err = svc.refresh("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn refresh_searches_the_card_keyword_and_keeps_prior_tags() {
        let svc = service(r#"{"summary": "fresh"}"#, false);
        let prior = KnowledgeCard {
            id: "c1".into(),
            title: "Rust".into(),
            summary: "old".into(),
            source: "keyword:rust async".into(),
            tags: vec!["ai".into(), "tech".into()],
            last_updated: 42,
            ..Default::default()
        };
        svc.store().save(&prior).await.unwrap();

        let card = svc.refresh("c1").await.unwrap();
        assert_eq!(svc.acquirer.searches.lock().unwrap().as_slice(), ["rust async"]);
        assert_eq!(card.summary, "fresh");
        assert_eq!(card.tags, prior.tags);
        assert!(card.last_updated > 42);
        assert_eq!(svc.store().get("c1").await.unwrap(), Some(card));
    }

    #[tokio::test]
    async fn refresh_scrapes_website_cards_from_their_source() {
        let svc = service(REPLY, false);
        let prior = KnowledgeCard {
            id: "w1".into(),
            source: "https://example.com".into(),
            card_type: CardType::Website,
            ..Default::default()
        };
        svc.store().save(&prior).await.unwrap();
        svc.refresh("w1").await.unwrap();
        assert_eq!(
            svc.acquirer.scrapes.lock().unwrap().as_slice(),
            ["https://example.com"]
        );
    }

    impl CardService<FakeAcquirer, Canned, MemStore> {
        fn synthesis_calls(&self) -> u32 {
            self.synthesis.backend().calls.load(Ordering::SeqCst)
        }
    }
}
