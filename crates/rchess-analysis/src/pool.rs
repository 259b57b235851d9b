//! 固定数のエンジンを多数の呼び出し元で共有するプール。
//!
//! - スロットの貸し出し（[`EnginePool::acquire`] / [`EnginePool::release`]）は厳密な FIFO
//! - エンジンへのコマンドはすべて [`EnginePool::run_exclusive`] を通り、スロットごとの
//!   async mutex で直列化される（UCI には要求 ID がないため、同じプロセスへのコマンド列が
//!   交差すると応答の対応が崩れる）
//! - 実行中の探索はスロットごとの中断トークンで止める。こちらは排他を待たない

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all, try_join_all};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineOptions, PoolConfig};
use crate::engine::{AnalysisRequest, AnalysisResult, Engine};
use crate::error::{AnalysisError, Result};

pub type SlotId = usize;

struct Allocation {
    allocated: Vec<bool>,
    waiters: VecDeque<oneshot::Sender<SlotId>>,
}

struct Slot<E> {
    engine: tokio::sync::Mutex<E>,
    /// 実行中の探索の中断トークン。探索ごとに差し替える
    interrupt: Mutex<CancellationToken>,
}

impl<E> Slot<E> {
    fn new(engine: E) -> Self {
        Self {
            engine: tokio::sync::Mutex::new(engine),
            interrupt: Mutex::new(CancellationToken::new()),
        }
    }

    /// 呼び出し元のトークン（あれば）に連動する新しい中断トークンを登録する。
    fn arm_interrupt(&self, cancel: Option<&CancellationToken>) -> CancellationToken {
        let token = cancel.map_or_else(CancellationToken::new, CancellationToken::child_token);
        *self.interrupt.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    fn interrupt(&self) {
        self.interrupt.lock().unwrap_or_else(PoisonError::into_inner).cancel();
    }
}

pub struct EnginePool<E> {
    slots: Vec<Slot<E>>,
    allocation: Mutex<Allocation>,
}

impl<E: Engine> EnginePool<E> {
    /// エンジンを初期化せずにプールを組み立てる。
    pub fn new(engines: Vec<E>) -> Self {
        let allocated = vec![false; engines.len()];
        Self {
            slots: engines.into_iter().map(Slot::new).collect(),
            allocation: Mutex::new(Allocation { allocated, waiters: VecDeque::new() }),
        }
    }

    /// スロット数を決めてエンジンを生成し、全エンジンのハンドシェイク完了を待ってから返す。
    pub async fn init(config: &PoolConfig, factory: impl FnMut(SlotId) -> E) -> Result<Self> {
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let size = config.resolved_size(cores);
        log::info!("starting engine pool with {size} worker(s) ({cores} cores available)");
        let pool = Self::new((0..size).map(factory).collect());
        pool.init_all().await?;
        Ok(pool)
    }

    pub async fn init_all(&self) -> Result<()> {
        try_join_all(
            self.slots.iter().map(|slot| async move { slot.engine.lock().await.init().await }),
        )
        .await?;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.allocation().allocated.iter().filter(|a| !**a).count()
    }

    pub fn waiting_count(&self) -> usize {
        self.allocation().waiters.len()
    }

    /// 空きスロットを確保する。空きがなければ `release` されるまで到着順に待つ。
    pub async fn acquire(&self) -> Result<SlotId> {
        let rx = {
            let mut alloc = self.allocation();
            if let Some(id) = alloc.allocated.iter().position(|a| !a) {
                alloc.allocated[id] = true;
                return Ok(id);
            }
            if self.slots.is_empty() {
                return Err(AnalysisError::NoWorkersAvailable);
            }
            let (tx, rx) = oneshot::channel();
            alloc.waiters.push_back(tx);
            rx
        };
        PendingAcquire { pool: self, rx: Some(rx) }.wait().await
    }

    /// スロットを返却する。待ち行列があれば空きに戻さず先頭の待機者へ直接引き渡す。
    pub fn release(&self, id: SlotId) -> Result<()> {
        let mut alloc = self.allocation();
        let Some(allocated) = alloc.allocated.get(id).copied() else {
            return Err(AnalysisError::WorkerNotFound(id));
        };
        if !allocated {
            log::warn!("release of worker {id} which is not allocated");
            return Ok(());
        }
        while let Some(waiter) = alloc.waiters.pop_front() {
            // 待機をやめた呼び出し元は飛ばす
            if waiter.send(id).is_ok() {
                return Ok(());
            }
        }
        alloc.allocated[id] = false;
        Ok(())
    }

    /// スロットを確保し、drop 時に返却するリースを返す。
    pub async fn lease(&self) -> Result<SlotLease<'_, E>> {
        let id = self.acquire().await?;
        Ok(SlotLease { pool: self, id })
    }

    /// スロット `id` のエンジンに対して `op` を排他的に実行する。
    ///
    /// 同じスロットへの操作は投入順に 1 つずつ実行される。実行前にエンジンが起動済みかを確認し、
    /// 終了していれば起動し直す。`op` の失敗は後続の操作に影響しない。
    pub async fn run_exclusive<T, F>(&self, id: SlotId, op: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut E) -> BoxFuture<'a, Result<T>>,
    {
        let (_, mut engine) = self.lock_ready(id).await?;
        op(&mut *engine).await
    }

    /// 解析する。探索中に [`EnginePool::stop_all`] / [`EnginePool::dispose_all`] が呼ばれたら
    /// `AnalysisAborted` で打ち切られる。
    pub async fn analyze_with_worker(
        &self,
        id: SlotId,
        mut request: AnalysisRequest,
    ) -> Result<AnalysisResult> {
        let (slot, mut engine) = self.lock_ready(id).await?;
        request.cancel = Some(slot.arm_interrupt(request.cancel.as_ref()));
        engine.analyze(request).await
    }

    pub async fn new_game(&self, id: SlotId) -> Result<()> {
        self.run_exclusive(id, |engine| engine.new_game().boxed()).await
    }

    pub async fn configure(&self, id: SlotId, options: EngineOptions) -> Result<()> {
        self.run_exclusive(id, |engine| engine.configure(options).boxed()).await
    }

    pub async fn ping(&self, id: SlotId) -> Result<()> {
        self.run_exclusive(id, |engine| engine.ping().boxed()).await
    }

    /// スロット 0 のエンジンに readiness を問い合わせる。
    pub async fn check_health(&self) -> Result<()> {
        if self.slots.is_empty() {
            return Err(AnalysisError::NoWorkersAvailable);
        }
        self.ping(0).await
    }

    /// 実行中の探索を中断させ、全エンジンに `stop` を送る。起動し直しはしない。
    pub async fn stop_all(&self) {
        self.interrupt_all();
        let results = join_all(self.slots.iter().map(|slot| async move {
            slot.engine.lock().await.stop().await
        }))
        .await;
        for (id, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                log::warn!("worker {id}: stop failed: {e}");
            }
        }
    }

    pub async fn dispose_all(&self) {
        self.interrupt_all();
        join_all(
            self.slots.iter().map(|slot| async move { slot.engine.lock().await.dispose().await }),
        )
        .await;
    }

    fn interrupt_all(&self) {
        for slot in &self.slots {
            slot.interrupt();
        }
    }

    /// スロットの排他を取り、エンジンが起動済みであることを確かめる。
    async fn lock_ready(&self, id: SlotId) -> Result<(&Slot<E>, tokio::sync::MutexGuard<'_, E>)> {
        let slot = self.slots.get(id).ok_or(AnalysisError::WorkerNotFound(id))?;
        let mut engine = slot.engine.lock().await;
        engine.init().await?;
        Ok((slot, engine))
    }

    fn allocation(&self) -> MutexGuard<'_, Allocation> {
        self.allocation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 待機中の `acquire`。待機側の future が途中で drop されても、引き渡し済みのスロットは返却する。
struct PendingAcquire<'a, E: Engine> {
    pool: &'a EnginePool<E>,
    rx: Option<oneshot::Receiver<SlotId>>,
}

impl<E: Engine> PendingAcquire<'_, E> {
    async fn wait(mut self) -> Result<SlotId> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(AnalysisError::NoWorkersAvailable);
        };
        let id = rx.await.map_err(|_| AnalysisError::NoWorkersAvailable)?;
        self.rx = None;
        Ok(id)
    }
}

impl<E: Engine> Drop for PendingAcquire<'_, E> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(id) = rx.try_recv() {
                let _ = self.pool.release(id);
            }
        }
    }
}

/// [`EnginePool::lease`] で確保したスロット。drop で返却される。
pub struct SlotLease<'a, E: Engine> {
    pool: &'a EnginePool<E>,
    id: SlotId,
}

impl<E: Engine> SlotLease<'_, E> {
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// 返却せずにスロット id だけを取り出す。以後の返却は呼び出し元が `release` で行う。
    pub fn detach(self) -> SlotId {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl<E: Engine> Drop for SlotLease<'_, E> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.release(self.id) {
            log::warn!("failed to release worker {}: {e}", self.id);
        }
    }
}
