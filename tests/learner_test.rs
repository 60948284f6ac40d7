use async_trait::async_trait;
use babbler::chain::ChainStore;
use babbler::learner::{LearnReport, Learner};
use babbler::store::memory::MemoryStore;
use babbler::store::sqlite::SqliteStore;
use babbler::store::{ChainRepository, Second, StoreError, WordRepository};
use babbler::tokenizer::tokenize;
use babbler::types::{ChainStats, ConversationId, Pair, PairId, Reply, ReplyId, WordId};
use babbler::vocabulary::Vocabulary;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const END: [char; 3] = ['.', '!', '?'];

fn learner_over(store: Arc<MemoryStore>, chain: Arc<dyn ChainRepository>) -> Learner {
    Learner::new(
        Vocabulary::new(store),
        ChainStore::new(chain, 3),
        END.to_vec(),
    )
}

fn memory_learner() -> (Arc<MemoryStore>, Learner) {
    let store = Arc::new(MemoryStore::default());
    let learner = learner_over(store.clone(), store.clone());
    (store, learner)
}

async fn id_of(store: &MemoryStore, text: &str) -> WordId {
    store
        .find_by_text(&[text.to_string()])
        .await
        .expect("lookup")
        .first()
        .map(|w| w.id)
        .unwrap_or_else(|| panic!("word {text} missing"))
}

async fn counter(
    store: &MemoryStore,
    conversation: ConversationId,
    first: Option<WordId>,
    second: Option<WordId>,
    next: Option<WordId>,
) -> u64 {
    store
        .find_pair(conversation, first, second)
        .await
        .expect("find pair")
        .and_then(|pair| pair.reply_to(next).map(|r| r.counter))
        .unwrap_or(0)
}

/// Chain repository whose `find_pair` fails on one chosen call.
struct FlakyChain {
    inner: Arc<MemoryStore>,
    calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl ChainRepository for FlakyChain {
    async fn find_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Option<Pair>, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StoreError::Unavailable("timeout".into()));
        }
        self.inner.find_pair(conversation, first, second).await
    }

    async fn insert_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Pair, StoreError> {
        self.inner.insert_pair(conversation, first, second).await
    }

    async fn insert_reply(&self, pair: PairId, word: Option<WordId>) -> Result<Reply, StoreError> {
        self.inner.insert_reply(pair, word).await
    }

    async fn increment_reply(&self, reply: ReplyId) -> Result<u64, StoreError> {
        self.inner.increment_reply(reply).await
    }

    async fn top_pairs(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: &Second,
        limit: usize,
    ) -> Result<Vec<Pair>, StoreError> {
        self.inner.top_pairs(conversation, first, second, limit).await
    }

    async fn stats(&self, conversation: ConversationId) -> Result<ChainStats, StoreError> {
        self.inner.stats(conversation).await
    }
}

/// How the first `find_pair` call lies about the stored chain, as if another
/// writer got in between the read and the write that follows it.
#[derive(Clone, Copy)]
enum Race {
    /// The pair comes back without its replies.
    StaleReplies,
    /// The pair is reported missing.
    MissingPair,
}

struct RacingChain {
    inner: Arc<MemoryStore>,
    finds: AtomicUsize,
    race: Race,
}

#[async_trait]
impl ChainRepository for RacingChain {
    async fn find_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Option<Pair>, StoreError> {
        let found = self.inner.find_pair(conversation, first, second).await?;
        if self.finds.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(found);
        }
        Ok(match self.race {
            Race::StaleReplies => found.map(|pair| Pair {
                replies: Vec::new(),
                ..pair
            }),
            Race::MissingPair => None,
        })
    }

    async fn insert_pair(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: Option<WordId>,
    ) -> Result<Pair, StoreError> {
        self.inner.insert_pair(conversation, first, second).await
    }

    async fn insert_reply(&self, pair: PairId, word: Option<WordId>) -> Result<Reply, StoreError> {
        self.inner.insert_reply(pair, word).await
    }

    async fn increment_reply(&self, reply: ReplyId) -> Result<u64, StoreError> {
        self.inner.increment_reply(reply).await
    }

    async fn top_pairs(
        &self,
        conversation: ConversationId,
        first: Option<WordId>,
        second: &Second,
        limit: usize,
    ) -> Result<Vec<Pair>, StoreError> {
        self.inner.top_pairs(conversation, first, second, limit).await
    }

    async fn stats(&self, conversation: ConversationId) -> Result<ChainStats, StoreError> {
        self.inner.stats(conversation).await
    }
}

/// Learn "hi" once directly, then once more through a racing chain.
async fn relearn_through_race(race: Race) -> (Arc<MemoryStore>, LearnReport) {
    let (store, learner) = memory_learner();
    let tokens = tokenize("hi", &[]);
    learner.learn(1, &tokens).await;

    let racing = Arc::new(RacingChain {
        inner: store.clone(),
        finds: AtomicUsize::new(0),
        race,
    });
    let report = learner_over(store.clone(), racing).learn(1, &tokens).await;
    (store, report)
}

#[tokio::test]
async fn learns_sentence_framed_transitions() {
    let (store, learner) = memory_learner();
    let tokens = tokenize("Hello world. Hello again!", &[]);

    let report = learner.learn(1, &tokens).await;
    assert_eq!(
        report,
        LearnReport {
            windows: 5,
            applied: 5,
            failed: 0
        }
    );

    let hello = Some(id_of(&store, "hello").await);
    let world = Some(id_of(&store, "world.").await);
    let again = Some(id_of(&store, "again!").await);

    assert_eq!(counter(&store, 1, None, hello, world).await, 1);
    assert_eq!(counter(&store, 1, None, hello, again).await, 1);
    assert_eq!(counter(&store, 1, hello, world, None).await, 1);
    assert_eq!(counter(&store, 1, world, None, hello).await, 1);
    assert_eq!(counter(&store, 1, hello, again, None).await, 1);

    let stats = store.stats(1).await.expect("stats");
    assert_eq!(stats.pairs, 4);
    assert_eq!(stats.replies, 5);
}

#[tokio::test]
async fn relearning_increments_counters() {
    let (store, learner) = memory_learner();
    let tokens = tokenize("Hello world. Hello again!", &[]);

    learner.learn(1, &tokens).await;
    learner.learn(1, &tokens).await;

    let hello = Some(id_of(&store, "hello").await);
    let world = Some(id_of(&store, "world.").await);
    assert_eq!(counter(&store, 1, None, hello, world).await, 2);
    assert_eq!(counter(&store, 1, hello, world, None).await, 2);

    let stats = store.stats(1).await.expect("stats");
    assert_eq!(stats.pairs, 4);
    assert_eq!(stats.replies, 5);
}

#[tokio::test]
async fn counters_track_every_observation() {
    let (store, learner) = memory_learner();
    let tokens = tokenize("good morning", &[]);

    for _ in 0..7 {
        learner.learn(3, &tokens).await;
    }

    let good = Some(id_of(&store, "good").await);
    let morning = Some(id_of(&store, "morning").await);
    assert_eq!(counter(&store, 3, None, good, morning).await, 7);
    assert_eq!(counter(&store, 3, good, morning, None).await, 7);
}

#[tokio::test]
async fn conversations_do_not_share_chains() {
    let (store, learner) = memory_learner();
    learner.learn(1, &tokenize("only here", &[])).await;

    assert_eq!(store.stats(1).await.expect("stats").pairs, 2);
    assert_eq!(store.stats(2).await.expect("stats").pairs, 0);
    // Words are global, so the other conversation already knows them.
    assert_eq!(store.word_count(), 2);
}

#[tokio::test]
async fn single_token_message_learns_one_window() {
    let (store, learner) = memory_learner();
    let report = learner.learn(1, &tokenize("hi", &[])).await;

    assert_eq!(report.windows, 1);
    let hi = Some(id_of(&store, "hi").await);
    assert_eq!(counter(&store, 1, None, hi, None).await, 1);
}

#[tokio::test]
async fn failing_window_is_skipped_and_the_rest_applied() {
    let store = Arc::new(MemoryStore::default());
    let flaky = Arc::new(FlakyChain {
        inner: store.clone(),
        calls: AtomicUsize::new(0),
        fail_on: 2,
    });
    let learner = learner_over(store.clone(), flaky);

    let report = learner
        .learn(1, &tokenize("Hello world. Hello again!", &[]))
        .await;

    assert_eq!(
        report,
        LearnReport {
            windows: 5,
            applied: 4,
            failed: 1
        }
    );
    let hello = Some(id_of(&store, "hello").await);
    let world = Some(id_of(&store, "world.").await);
    assert_eq!(counter(&store, 1, hello, world, None).await, 0);
    assert_eq!(counter(&store, 1, None, hello, world).await, 1);
}

#[tokio::test]
async fn reply_insert_conflict_increments_existing_reply() {
    let (store, report) = relearn_through_race(Race::StaleReplies).await;
    assert_eq!(
        report,
        LearnReport {
            windows: 1,
            applied: 1,
            failed: 0
        }
    );

    let hi = Some(id_of(&store, "hi").await);
    assert_eq!(counter(&store, 1, None, hi, None).await, 2);
    let stats = store.stats(1).await.expect("stats");
    assert_eq!(stats.replies, 1);
}

#[tokio::test]
async fn pair_insert_conflict_reuses_existing_pair() {
    let (store, report) = relearn_through_race(Race::MissingPair).await;
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 0);

    let hi = Some(id_of(&store, "hi").await);
    assert_eq!(counter(&store, 1, None, hi, None).await, 2);
    let stats = store.stats(1).await.expect("stats");
    assert_eq!(stats.pairs, 1);
}

const WRITERS: u64 = 8;

async fn learn_concurrently(
    words: Arc<dyn WordRepository>,
    chain: Arc<dyn ChainRepository>,
) -> ChainStats {
    let learner = Learner::new(
        Vocabulary::new(words),
        ChainStore::new(chain.clone(), 3),
        END.to_vec(),
    );
    let tokens = tokenize("Hello world. Hello again!", &[]);

    let tasks = (0..WRITERS).map(|_| {
        let learner = learner.clone();
        let tokens = tokens.clone();
        tokio::spawn(async move { learner.learn(1, &tokens).await })
    });
    for report in futures::future::join_all(tasks).await {
        let report = report.expect("learn task");
        assert_eq!(report.failed, 0, "{report:?}");
        assert_eq!(report.applied, 5);
    }

    chain.stats(1).await.expect("stats")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_learns_converge_in_memory() {
    let store = Arc::new(MemoryStore::default());
    let stats = learn_concurrently(store.clone(), store).await;

    assert_eq!(stats.pairs, 4);
    assert_eq!(stats.replies, 5);
    assert_eq!(stats.observations, 5 * WRITERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_learns_converge_in_sqlite() {
    let store = Arc::new(SqliteStore::open_in_memory(10).expect("open sqlite"));
    let stats = learn_concurrently(store.clone(), store).await;

    assert_eq!(stats.pairs, 4);
    assert_eq!(stats.replies, 5);
    assert_eq!(stats.observations, 5 * WRITERS);
}
