//! Integration tests for the overlay engine

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Timelike, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    use polyoverlay::candles::{CandleStream, KlineEvent, SubscriptionGeneration};
    use polyoverlay::config::AppConfig;
    use polyoverlay::engine::{EngineDeps, EngineHandle, OverlayEngine};
    use polyoverlay::exchange::{CandleProvider, KlineSubscription, TimeRange};
    use polyoverlay::overlay::{
        AnnotationLedger, AnnotationLine, ExpiryWatchdog, LineId, LineStyle,
        MultiIntervalAggregator, POLYMARKET_NAMESPACE,
    };
    use polyoverlay::period::{IntervalWindow, PeriodAligner};
    use polyoverlay::polymarket::{
        CandidateMarket, OrderGateway, OrderOutcome, OrderRequest, PeriodPrices, PredictionMarket,
    };
    use polyoverlay::render::BroadcastSurface;
    use polyoverlay::types::{find_symbol, Candle, Direction, Interval, SymbolKey, Ticker24h};

    // ============================================================================
    // Fakes
    // ============================================================================

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, h, m, s).unwrap()
    }

    fn candle(time: i64, close: Decimal) -> Candle {
        Candle {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    /// Counts aggregation cycles through the 1h period lookups
    #[derive(Default)]
    struct FakeMarket {
        cycles: AtomicUsize,
        failing: Option<Interval>,
    }

    impl FakeMarket {
        fn cycles(&self) -> usize {
            self.cycles.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PredictionMarket for FakeMarket {
        async fn period_prices(&self, _asset: &str, window: &IntervalWindow) -> Result<PeriodPrices> {
            if window.interval == Interval::Hour1 {
                self.cycles.fetch_add(1, Ordering::SeqCst);
            }
            if self.failing == Some(window.interval) {
                bail!("upstream timeout");
            }
            Ok(PeriodPrices {
                open: Some(Decimal::from(70_000 + window.start.minute() as i64)),
                close: None,
            })
        }

        async fn discover_markets(&self, category: &str) -> Result<Vec<CandidateMarket>> {
            Ok(vec![CandidateMarket {
                condition_id: format!("0x{}", category),
                slug: format!("bitcoin-up-or-down-{}", category.to_lowercase()),
                question: "Bitcoin Up or Down?".into(),
                outcomes: vec!["Up".into(), "Down".into()],
                token_ids: vec![format!("up-{}", category), format!("down-{}", category)],
                outcome_prices: vec![dec!(0.6), dec!(0.4)],
                last_trade_price: Some(dec!(0.6)),
                end_time: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
                active: true,
                closed: false,
            }])
        }

        async fn last_trade_price(&self, _token_id: &str) -> Result<Decimal> {
            Ok(dec!(0.7))
        }
    }

    /// Candle provider whose push channels stay in the test's hands
    #[derive(Default)]
    struct FakeCandles {
        feeds: Mutex<Vec<(SubscriptionGeneration, mpsc::Sender<KlineEvent>)>>,
        slow_symbol: Option<&'static str>,
    }

    impl FakeCandles {
        fn feed(&self, index: usize) -> (SubscriptionGeneration, mpsc::Sender<KlineEvent>) {
            self.feeds.lock().unwrap()[index].clone()
        }

        fn open_feeds(&self) -> usize {
            self.feeds
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, tx)| !tx.is_closed())
                .count()
        }
    }

    #[async_trait]
    impl CandleProvider for FakeCandles {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_candles(
            &self,
            symbol: &str,
            _interval: Interval,
            _limit: usize,
            _range: Option<TimeRange>,
        ) -> Result<Vec<Candle>> {
            if self.slow_symbol == Some(symbol) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let close = if symbol == "ETHUSDT" { dec!(3500) } else { dec!(70000) };
            Ok(vec![candle(100, close), candle(200, close)])
        }

        async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker24h> {
            Ok(Ticker24h {
                last_price: dec!(70000),
                price_change: dec!(100),
                price_change_percent: dec!(0.14),
                high_price: dec!(71000),
                low_price: dec!(69000),
                volume: dec!(1234),
            })
        }

        fn subscribe(
            &self,
            _symbol: &str,
            _interval: Interval,
            generation: SubscriptionGeneration,
        ) -> KlineSubscription {
            let (tx, rx) = mpsc::channel(16);
            self.feeds.lock().unwrap().push((generation, tx));
            KlineSubscription::from_channel(generation, rx)
        }
    }

    struct FillAll;

    #[async_trait]
    impl OrderGateway for FillAll {
        async fn place(&self, request: OrderRequest) -> OrderOutcome {
            if request.private_key.is_empty() {
                return OrderOutcome::failed("Signing key is required");
            }
            OrderOutcome::filled("order-1".into(), format!("{} {}", request.direction, request.symbol))
        }
    }

    fn start_engine(
        market: Arc<FakeMarket>,
        candles: Arc<FakeCandles>,
    ) -> (EngineHandle, tokio::task::JoinHandle<Result<()>>) {
        let mut config = AppConfig::with_defaults().unwrap();
        config.polymarket.tracked_intervals = vec![Interval::Min5, Interval::Hour1];
        config.schedule.aggregation_every_ticks = 100_000;

        let (engine, handle) = OverlayEngine::new(
            &config,
            EngineDeps {
                candles,
                market,
                orders: Arc::new(FillAll),
                surface: BroadcastSurface::new(256, 800, 600),
                settings: None,
                recorder: None,
            },
        )
        .unwrap();

        let base = at(13, 0, 0);
        let started = tokio::time::Instant::now();
        let engine = engine.with_clock(Arc::new(move || {
            base + chrono::Duration::from_std(started.elapsed()).unwrap()
        }));
        (handle, tokio::spawn(engine.run()))
    }

    // ============================================================================
    // Period Aligner
    // ============================================================================

    #[test]
    fn test_uniform_alignment_bounds_and_idempotence() {
        let aligner = PeriodAligner::prediction_market();
        for interval in [Interval::Min5, Interval::Min15, Interval::Hour1] {
            let d = interval.duration_secs().unwrap();
            for t in (1_700_000_000i64..1_700_200_000).step_by(977) {
                let start = aligner.window_start(interval, t).unwrap();
                assert!(start <= t && t < start + d, "{} {}", interval, t);
                assert_eq!(aligner.window_start(interval, start).unwrap(), start);
            }
        }
    }

    #[test]
    fn test_offset_alignment_hours() {
        let aligner = PeriodAligner::prediction_market();
        for t in (1_700_000_000i64..1_701_000_000).step_by(3_331) {
            let four_hour = aligner.window_start(Interval::Hour4, t).unwrap();
            let hour = Utc.timestamp_opt(four_hour, 0).unwrap().hour();
            assert!([1, 5, 9, 13, 17, 21].contains(&hour), "4h start at hour {}", hour);
            assert!(four_hour <= t && t < four_hour + 4 * 3600);

            let daily = aligner.window_start(Interval::Day1, t).unwrap();
            assert_eq!(Utc.timestamp_opt(daily, 0).unwrap().hour(), 17);
            assert!(daily <= t && t < daily + 86_400);
        }
    }

    #[test]
    fn test_unsupported_interval_is_typed() {
        let aligner = PeriodAligner::prediction_market();
        assert!(aligner.current_window(Interval::Min1, at(13, 0, 0)).is_err());
        assert!(PeriodAligner::exchange()
            .current_window(Interval::Month1, at(13, 0, 0))
            .is_err());
    }

    // ============================================================================
    // Candle Stream Merger
    // ============================================================================

    #[test]
    fn test_candle_merge_scenario() {
        let generation = SubscriptionGeneration(1);
        let mut stream = CandleStream::new();
        stream.reset(
            SymbolKey {
                symbol: "BTCUSDT",
                interval: Interval::Min5,
            },
            generation,
        );
        stream.load(generation, vec![candle(100, dec!(1)), candle(200, dec!(2))]);

        stream.apply_delta(candle(200, dec!(2.5)));
        let times: Vec<(i64, Decimal)> = stream.candles().iter().map(|c| (c.time, c.close)).collect();
        assert_eq!(times, vec![(100, dec!(1)), (200, dec!(2.5))]);

        stream.apply_delta(candle(300, dec!(3)));
        let times: Vec<(i64, Decimal)> = stream.candles().iter().map(|c| (c.time, c.close)).collect();
        assert_eq!(times, vec![(200, dec!(2.5)), (300, dec!(3))]);

        stream.apply_delta(candle(250, dec!(9)));
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.last().unwrap().close, dec!(3));
    }

    // ============================================================================
    // Annotation Ledger
    // ============================================================================

    #[test]
    fn test_user_edits_never_remove_system_lines() {
        let mut ledger = AnnotationLedger::new();
        let system = AnnotationLine {
            id: LineId::system(POLYMARKET_NAMESPACE, "1h"),
            price: dec!(70000),
            color: "#fa8c16".into(),
            style: LineStyle::Dashed,
            label: "1h 60%".into(),
            width: 1,
        };
        ledger.upsert_system(system.clone());

        let edits: Vec<Vec<AnnotationLine>> = vec![
            vec![],
            vec![AnnotationLine {
                id: LineId::new_user(),
                price: dec!(1),
                ..system.clone()
            }],
            vec![AnnotationLine {
                price: dec!(0),
                ..system.clone()
            }],
            ledger.visible_lines(),
        ];
        for edit in edits {
            ledger.set_user_lines(edit);
            let visible = ledger.visible_lines();
            assert!(visible.contains(&system));
            assert_eq!(visible.iter().filter(|l| l.id.is_system()).count(), 1);
        }
    }

    // ============================================================================
    // Aggregator + Watchdog
    // ============================================================================

    #[tokio::test]
    async fn test_btc_scenario_windows_and_countdown() {
        let aggregator = MultiIntervalAggregator::new(
            Arc::new(FakeMarket::default()),
            PeriodAligner::prediction_market(),
            dec!(50),
        );
        let btc = find_symbol("BTC").unwrap();
        let results = aggregator
            .refresh(btc, &[Interval::Min5, Interval::Hour1], at(13, 0, 0))
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!((results[0].window_start, results[0].window_end), (at(13, 0, 0), at(13, 5, 0)));
        assert_eq!((results[1].window_start, results[1].window_end), (at(13, 0, 0), at(14, 0, 0)));
        assert_eq!(results[0].traded_probability, dec!(60.0));

        let mut watchdog = ExpiryWatchdog::new();
        let tick = watchdog.tick(at(13, 4, 59), &results);
        assert_eq!(tick.countdowns[0].display, "0:01");
        assert_eq!(tick.countdowns[1].display, "55:01");
    }

    #[tokio::test]
    async fn test_aggregator_isolates_failed_interval() {
        let market = FakeMarket {
            failing: Some(Interval::Min15),
            ..Default::default()
        };
        let aggregator =
            MultiIntervalAggregator::new(Arc::new(market), PeriodAligner::prediction_market(), dec!(50));
        let btc = find_symbol("BTCUSDT").unwrap();
        let all = [Interval::Min5, Interval::Min15, Interval::Hour1, Interval::Hour4, Interval::Day1];
        let results = aggregator.refresh(btc, &all, at(13, 0, 0)).await;

        let intervals: Vec<Interval> = results.iter().map(|r| r.interval).collect();
        assert_eq!(
            intervals,
            vec![Interval::Min5, Interval::Hour1, Interval::Hour4, Interval::Day1]
        );
    }

    // ============================================================================
    // Engine
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_engine_expiry_triggers_one_refresh() {
        let market = Arc::new(FakeMarket::default());
        let (handle, task) = start_engine(market.clone(), Arc::new(FakeCandles::default()));

        handle
            .subscribe()
            .wait_for(|s| s.intervals.len() == 2)
            .await
            .unwrap();
        assert_eq!(market.cycles(), 1);
        assert_eq!(handle.snapshot().lines.len(), 2);

        tokio::time::sleep(Duration::from_secs(290)).await;
        assert_eq!(market.cycles(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(market.cycles(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(market.cycles(), 2);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.intervals[0].result.window_end, at(13, 10, 0));
        assert!(!snapshot.refresh_pending);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_push_delta_updates_last_candle() {
        let candles = Arc::new(FakeCandles::default());
        let (handle, task) = start_engine(Arc::new(FakeMarket::default()), candles.clone());

        handle
            .subscribe()
            .wait_for(|s| s.candle_count == 2)
            .await
            .unwrap();
        let (generation, feed) = candles.feed(0);
        feed.send(KlineEvent {
            generation,
            candle: candle(200, dec!(70123)),
            closed: false,
        })
        .await
        .unwrap();

        let snapshot = handle
            .subscribe()
            .wait_for(|s| s.last_candle.as_ref().map(|c| c.close) == Some(dec!(70123)))
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.candle_count, 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_switch_discards_old_session() {
        let candles = Arc::new(FakeCandles {
            slow_symbol: Some("BTCUSDT"),
            ..Default::default()
        });
        let (handle, task) = start_engine(Arc::new(FakeMarket::default()), candles.clone());

        handle.switch_symbol("ETHUSDT").await.unwrap();
        handle.switch_interval(Interval::Min15).await.unwrap();
        handle
            .subscribe()
            .wait_for(|s| s.symbol == "ETHUSDT" && s.interval == Interval::Min15 && s.candle_count == 2)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.last_candle.map(|c| c.close), Some(dec!(3500)));
        assert_eq!(candles.open_feeds(), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(candles.open_feeds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_order_is_one_shot() {
        let (handle, task) = start_engine(
            Arc::new(FakeMarket::default()),
            Arc::new(FakeCandles::default()),
        );

        let outcome = handle
            .place_order(OrderRequest {
                symbol: "BTCUSDT".into(),
                interval: Interval::Min15,
                direction: Direction::Up,
                amount_usdc: dec!(5),
                private_key: "0xkey".into(),
            })
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.order_id.as_deref(), Some("order-1"));

        let outcome = handle
            .place_order(OrderRequest {
                symbol: "BTCUSDT".into(),
                interval: Interval::Min15,
                direction: Direction::Down,
                amount_usdc: dec!(5),
                private_key: String::new(),
            })
            .await
            .unwrap();
        assert!(!outcome.success);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
