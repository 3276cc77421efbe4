//! Catalog operations: listing, ranking, owner-guarded mutation and rating.

use std::sync::Arc;

use libris_authz::assert_owner;
use libris_db::Collection;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::error::{CatalogError, CatalogResult};
use super::models::{Book, BookPatch, BookView, NewBook};
use super::rating::{self, round2};
use crate::images::{ImageStore, ImageUpload, StoredImage};

pub struct CatalogService {
    books: Collection<Book>,
    images: Arc<dyn ImageStore>,
    releases: TaskTracker,
    flushing: Mutex<()>,
    top_rated_limit: usize,
}

impl CatalogService {
    pub fn new(books: Collection<Book>, images: Arc<dyn ImageStore>, top_rated_limit: usize) -> Self {
        Self {
            books,
            images,
            releases: TaskTracker::new(),
            flushing: Mutex::new(()),
            top_rated_limit,
        }
    }

    /// How many books the best-rated listing returns.
    pub fn top_rated_limit(&self) -> usize {
        self.top_rated_limit
    }

    pub async fn count(&self) -> usize {
        self.books.len().await
    }

    pub async fn list_all(&self) -> CatalogResult<Vec<BookView>> {
        let books = self.books.all().await?;
        Ok(books.into_iter().map(|b| self.view(b)).collect())
    }

    pub async fn get_by_id(&self, id: &str) -> CatalogResult<BookView> {
        self.books
            .find_by_id(id)
            .await?
            .map(|b| self.view(b))
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    /// Best average first; equal averages keep insertion order.
    pub async fn get_top_rated(&self, n: usize) -> CatalogResult<Vec<BookView>> {
        let mut books = self.books.all().await?;
        books.sort_by(|a, b| b.average_rating.total_cmp(&a.average_rating));
        books.truncate(n);
        Ok(books.into_iter().map(|b| self.view(b)).collect())
    }

    /// Hand an upload to the image store.
    pub async fn store_image(&self, upload: ImageUpload) -> CatalogResult<StoredImage> {
        Ok(self.images.store(upload).await?)
    }

    /// Create a book owned by `owner_id`.
    ///
    /// If anything fails after `image` was stored, the image is released.
    pub async fn create(
        &self,
        owner_id: &str,
        fields: NewBook,
        image: Option<StoredImage>,
    ) -> CatalogResult<BookView> {
        let Some(image) = image.filter(|i| !i.locator.is_empty()) else {
            return Err(CatalogError::MissingImage);
        };

        let result = self.build_book(owner_id, &fields, &image);
        let inserted = match result {
            Ok(book) => self.books.insert(book).await.map_err(CatalogError::from),
            Err(err) => Err(err),
        };

        match inserted {
            Ok(book) => {
                tracing::info!(book_id = %book.id, user_id = owner_id, "book created");
                Ok(self.view(book))
            }
            Err(err) => {
                self.release(image.delete_handle);
                Err(err)
            }
        }
    }

    fn build_book(&self, owner_id: &str, fields: &NewBook, image: &StoredImage) -> CatalogResult<Book> {
        let valid = fields.validate().map_err(CatalogError::Validation)?;

        let mut book = Book {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.to_string(),
            title: valid.title,
            author: valid.author,
            genre: valid.genre,
            year: valid.year,
            image_locator: image.locator.clone(),
            image_delete_handle: image.delete_handle.clone(),
            ratings: Vec::new(),
            average_rating: 0.0,
        };

        if let Some(grade) = fields.initial_grade(owner_id) {
            rating::add_rating(&mut book, owner_id, grade)?;
        }
        Ok(book)
    }

    /// Apply `patch` (and optionally a new cover) to a book `identity` owns.
    ///
    /// Existence and ownership are checked before the patch is validated.
    /// The replaced cover is released after the write; on failure the new one
    /// is released instead.
    pub async fn update(
        &self,
        id: &str,
        identity: &str,
        patch: BookPatch,
        new_image: Option<StoredImage>,
    ) -> CatalogResult<BookView> {
        let mut replaced_handle = None;
        let result = self
            .books
            .update_with(id, |book| {
                assert_owner(book, identity)?;
                patch
                    .validate()
                    .map_err(CatalogError::Validation)?
                    .apply(book);
                if let Some(image) = &new_image {
                    replaced_handle = book.image_delete_handle.take();
                    book.image_locator = image.locator.clone();
                    book.image_delete_handle = image.delete_handle.clone();
                }
                Ok::<(), CatalogError>(())
            })
            .await;

        match result {
            Ok(Some(book)) => {
                tracing::info!(
                    book_id = id,
                    user_id = identity,
                    new_image = new_image.is_some(),
                    "book updated"
                );
                self.release(replaced_handle);
                Ok(self.view(book))
            }
            Ok(None) => {
                self.release(new_image.and_then(|i| i.delete_handle));
                Err(CatalogError::NotFound(id.to_string()))
            }
            Err(err) => {
                self.release(new_image.and_then(|i| i.delete_handle));
                Err(err)
            }
        }
    }

    /// Remove a book `identity` owns, then release its cover.
    pub async fn delete(&self, id: &str, identity: &str) -> CatalogResult<()> {
        let removed = self
            .books
            .remove_with(id, |book| {
                assert_owner(book, identity).map_err(CatalogError::from)
            })
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;

        tracing::info!(book_id = id, user_id = identity, "book deleted");
        self.release(removed.image_delete_handle);
        Ok(())
    }

    /// Record `rater_id`'s grade. Any authenticated user may rate, owner
    /// included, once per book.
    pub async fn rate(&self, id: &str, rater_id: &str, grade: i64) -> CatalogResult<BookView> {
        let book = self
            .books
            .update_with(id, |book| {
                rating::add_rating(book, rater_id, grade).map_err(CatalogError::from)
            })
            .await?
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;

        tracing::info!(
            book_id = id,
            user_id = rater_id,
            grade,
            average = book.average_rating,
            "book rated"
        );
        Ok(self.view(book))
    }

    /// Wait for every scheduled image release to finish.
    ///
    /// Concurrent callers take turns, so one caller's `reopen` never leaves
    /// another waiting on an open tracker.
    pub async fn flush_releases(&self) {
        let _turn = self.flushing.lock().await;
        self.releases.close();
        self.releases.wait().await;
        self.releases.reopen();
    }

    /// Delete an image in the background. Failures are logged, never returned.
    fn release(&self, handle: Option<String>) {
        let Some(handle) = handle else {
            return;
        };

        let images = Arc::clone(&self.images);
        self.releases.spawn(async move {
            match images.delete(&handle).await {
                Ok(()) => tracing::debug!(handle = %handle, "image released"),
                Err(e) => tracing::warn!(handle = %handle, error = %e, "failed to release image"),
            }
        });
    }

    fn view(&self, book: Book) -> BookView {
        BookView {
            image_url: self.images.resolve_url(&book.image_locator),
            average_rating: round2(book.average_rating),
            id: book.id,
            owner_id: book.owner_id,
            title: book.title,
            author: book.author,
            year: book.year,
            genre: book.genre,
            ratings: book.ratings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStore {
        stored: Mutex<u32>,
        deleted: Mutex<Vec<String>>,
        fail_deletes: bool,
    }

    #[async_trait]
    impl ImageStore for RecordingStore {
        async fn store(&self, upload: ImageUpload) -> Result<StoredImage, ImageError> {
            let mut n = self.stored.lock().unwrap();
            *n += 1;
            let name = format!("{}-{}.jpg", upload.file_name, *n);
            Ok(StoredImage {
                locator: name.clone(),
                delete_handle: Some(name),
            })
        }

        async fn delete(&self, handle: &str) -> Result<(), ImageError> {
            self.deleted.lock().unwrap().push(handle.to_string());
            if self.fail_deletes {
                return Err(ImageError::Io(std::io::Error::other("gone")));
            }
            Ok(())
        }

        fn resolve_url(&self, locator: &str) -> String {
            format!("http://cdn.test/images/{locator}")
        }
    }

    impl RecordingStore {
        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    fn service() -> (Arc<CatalogService>, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        let service = CatalogService::new(Collection::in_memory("books"), store.clone(), 3);
        (Arc::new(service), store)
    }

    fn image(name: &str) -> Option<StoredImage> {
        Some(StoredImage {
            locator: name.to_string(),
            delete_handle: Some(name.to_string()),
        })
    }

    fn fields(title: &str) -> NewBook {
        serde_json::from_value(json!({
            "title": title, "author": "A", "genre": "G", "year": 2020
        }))
        .unwrap()
    }

    fn patch(value: serde_json::Value) -> BookPatch {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn created_book_round_trips() {
        let (catalog, _) = service();

        let created = catalog.create("u1", fields("T"), image("t.jpg")).await.unwrap();
        let fetched = catalog.get_by_id(&created.id).await.unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.owner_id, "u1");
        assert_eq!(fetched.title, "T");
        assert_eq!(fetched.author, "A");
        assert_eq!(fetched.genre, "G");
        assert_eq!(fetched.year, 2020);
        assert!(fetched.ratings.is_empty());
        assert_eq!(fetched.average_rating, 0.0);
        assert_eq!(fetched.image_url, "http://cdn.test/images/t.jpg");
    }

    #[tokio::test]
    async fn create_without_image_persists_nothing() {
        let (catalog, _) = service();

        let err = catalog.create("u1", fields("T"), None).await.unwrap_err();
        assert!(matches!(err, CatalogError::MissingImage));

        let empty = Some(StoredImage {
            locator: String::new(),
            delete_handle: None,
        });
        let err = catalog.create("u1", fields("T"), empty).await.unwrap_err();
        assert!(matches!(err, CatalogError::MissingImage));

        assert!(catalog.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_create_releases_the_uploaded_image() {
        let (catalog, store) = service();

        let err = catalog
            .create("u1", fields("  "), image("orphan.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(ref f) if f[0].field == "title"));

        catalog.flush_releases().await;
        assert_eq!(store.deleted(), vec!["orphan.jpg"]);
        assert_eq!(catalog.count().await, 0);
    }

    #[tokio::test]
    async fn creators_initial_grade_becomes_the_first_rating() {
        let (catalog, _) = service();
        let new_book: NewBook = serde_json::from_value(json!({
            "title": "T", "author": "A", "genre": "G", "year": "2001",
            "ratings": [{ "userId": "u1", "grade": 4 }]
        }))
        .unwrap();

        let created = catalog.create("u1", new_book, image("t.jpg")).await.unwrap();
        assert_eq!(created.ratings.len(), 1);
        assert_eq!(created.average_rating, 4.0);
    }

    #[tokio::test]
    async fn top_rated_is_sorted_stable_and_truncated() {
        let (catalog, _) = service();
        let mut ids = Vec::new();
        for (title, grade) in [("a", 3), ("b", 5), ("c", 3), ("d", 1), ("e", 4)] {
            let book = catalog.create("owner", fields(title), image(title)).await.unwrap();
            catalog.rate(&book.id, "rater", grade).await.unwrap();
            ids.push(book.id);
        }

        let top = catalog.get_top_rated(3).await.unwrap();
        let titles: Vec<_> = top.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, ["b", "e", "a"]);

        let all = catalog.get_top_rated(10).await.unwrap();
        let titles: Vec<_> = all.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, ["b", "e", "a", "c", "d"]);
    }

    #[tokio::test]
    async fn rating_twice_is_rejected_and_leaves_the_book_unchanged() {
        let (catalog, _) = service();
        let book = catalog.create("owner", fields("T"), image("t.jpg")).await.unwrap();

        catalog.rate(&book.id, "u1", 2).await.unwrap();
        let after_first = catalog.get_by_id(&book.id).await.unwrap();

        let err = catalog.rate(&book.id, "u1", 5).await.unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateRating(ref u) if u == "u1"));
        assert_eq!(catalog.get_by_id(&book.id).await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn rating_unknown_book_is_not_found() {
        let (catalog, _) = service();
        let err = catalog.rate("missing", "u1", 3).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_grade_is_rejected() {
        let (catalog, _) = service();
        let book = catalog.create("owner", fields("T"), image("t.jpg")).await.unwrap();
        let err = catalog.rate(&book.id, "u1", 6).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidGrade(6)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ratings_by_different_users_are_all_kept() {
        let (catalog, _) = service();
        let book = catalog.create("owner", fields("T"), image("t.jpg")).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                let id = book.id.clone();
                tokio::spawn(async move { catalog.rate(&id, &format!("u{i}"), 1 + i % 5).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rated = catalog.get_by_id(&book.id).await.unwrap();
        assert_eq!(rated.ratings.len(), 20);
        assert_eq!(rated.average_rating, 3.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ratings_by_the_same_user_accept_exactly_one() {
        let (catalog, _) = service();
        let book = catalog.create("owner", fields("T"), image("t.jpg")).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                let id = book.id.clone();
                tokio::spawn(async move { catalog.rate(&id, "same", 4).await })
            })
            .collect();

        let mut accepted = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(CatalogError::DuplicateRating(_)) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!((accepted, duplicates), (1, 9));
        assert_eq!(catalog.get_by_id(&book.id).await.unwrap().ratings.len(), 1);
    }

    #[tokio::test]
    async fn only_the_owner_may_update_or_delete() {
        let (catalog, store) = service();
        let book = catalog.create("owner", fields("T"), image("t.jpg")).await.unwrap();

        let err = catalog
            .update(&book.id, "intruder", patch(json!({ "title": "X" })), image("new.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden(_)));

        let err = catalog.delete(&book.id, "intruder").await.unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden(_)));

        catalog.flush_releases().await;
        assert_eq!(catalog.get_by_id(&book.id).await.unwrap(), book);
        assert_eq!(store.deleted(), vec!["new.jpg"]);
    }

    #[tokio::test]
    async fn invalid_patch_from_a_non_owner_is_forbidden() {
        let (catalog, store) = service();
        let book = catalog.create("owner", fields("T"), image("t.jpg")).await.unwrap();

        let err = catalog
            .update(&book.id, "intruder", patch(json!({ "title": "  " })), image("new.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden(_)));

        let err = catalog
            .update("missing", "owner", patch(json!({ "year": "soon" })), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));

        let err = catalog
            .update(&book.id, "owner", patch(json!({ "title": "  " })), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(ref f) if f[0].field == "title"));

        catalog.flush_releases().await;
        assert_eq!(catalog.get_by_id(&book.id).await.unwrap(), book);
        assert_eq!(store.deleted(), vec!["new.jpg"]);
    }

    #[tokio::test]
    async fn partial_update_keeps_other_fields() {
        let (catalog, store) = service();
        let book = catalog.create("owner", fields("T"), image("t.jpg")).await.unwrap();

        let updated = catalog
            .update(&book.id, "owner", patch(json!({ "genre": "Poetry" })), None)
            .await
            .unwrap();

        assert_eq!(updated.genre, "Poetry");
        assert_eq!(updated.title, "T");
        assert_eq!(updated.image_url, book.image_url);

        catalog.flush_releases().await;
        assert!(store.deleted().is_empty());
    }

    #[tokio::test]
    async fn replacing_the_cover_releases_the_old_one() {
        let (catalog, store) = service();
        let book = catalog.create("owner", fields("T"), image("old.jpg")).await.unwrap();

        let updated = catalog
            .update(&book.id, "owner", BookPatch::default(), image("new.jpg"))
            .await
            .unwrap();

        assert_eq!(updated.image_url, "http://cdn.test/images/new.jpg");
        catalog.flush_releases().await;
        assert_eq!(store.deleted(), vec!["old.jpg"]);
    }

    #[tokio::test]
    async fn failed_release_does_not_fail_the_update() {
        let store = Arc::new(RecordingStore {
            fail_deletes: true,
            ..Default::default()
        });
        let catalog = CatalogService::new(Collection::in_memory("books"), store.clone(), 3);
        let book = catalog.create("owner", fields("T"), image("old.jpg")).await.unwrap();

        catalog
            .update(&book.id, "owner", BookPatch::default(), image("new.jpg"))
            .await
            .unwrap();
        catalog.delete(&book.id, "owner").await.unwrap();

        catalog.flush_releases().await;
        let mut deleted = store.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["new.jpg", "old.jpg"]);
    }

    #[tokio::test]
    async fn update_of_missing_book_releases_the_new_image() {
        let (catalog, store) = service();

        let err = catalog
            .update("missing", "owner", BookPatch::default(), image("new.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));

        catalog.flush_releases().await;
        assert_eq!(store.deleted(), vec!["new.jpg"]);
    }

    #[tokio::test]
    async fn delete_removes_the_book_and_releases_its_image_once() {
        let (catalog, store) = service();
        let keep = catalog.create("owner", fields("keep"), image("keep.jpg")).await.unwrap();
        let gone = catalog.create("owner", fields("gone"), image("gone.jpg")).await.unwrap();

        catalog.delete(&gone.id, "owner").await.unwrap();
        catalog.flush_releases().await;

        let remaining: Vec<_> = catalog
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(remaining, vec![keep.id]);
        assert_eq!(store.deleted(), vec!["gone.jpg"]);

        assert!(matches!(
            catalog.get_by_id(&gone.id).await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            catalog.delete(&gone.id, "owner").await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            catalog.rate(&gone.id, "u1", 3).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_flushes_all_complete() {
        let (catalog, store) = service();
        for n in 0..5 {
            let title = format!("b{n}");
            let book = catalog
                .create("owner", fields(&title), image(&format!("{title}.jpg")))
                .await
                .unwrap();
            catalog.delete(&book.id, "owner").await.unwrap();
        }

        let flushes: Vec<_> = (0..8)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                tokio::spawn(async move { catalog.flush_releases().await })
            })
            .collect();
        for flush in flushes {
            tokio::time::timeout(Duration::from_secs(5), flush)
                .await
                .expect("flush_releases hung")
                .unwrap();
        }

        assert_eq!(store.deleted().len(), 5);
    }

    #[tokio::test]
    async fn uploads_go_through_the_image_store() {
        let (catalog, _) = service();
        let stored = catalog
            .store_image(ImageUpload {
                file_name: "cover".into(),
                content_type: "image/jpeg".into(),
                bytes: axum::body::Bytes::from_static(b"jpeg"),
            })
            .await
            .unwrap();
        assert_eq!(stored.locator, "cover-1.jpg");
    }
}
