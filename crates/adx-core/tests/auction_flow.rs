//! End-to-end auction flows across both layers.

use adx_core::pda;
use adx_core::{
    AdRequest, AdResponse, AdxError, AuctionRecord, Exchange, ExchangeEvent, InMemoryTokenLedger,
    Layer, ManualClock, ProgramDerived, RequestId, RequestStatus, Residency, TokenLedger,
    REQUEST_TTL_SECONDS,
};
use solana_program::pubkey::Pubkey;

const FLOOR: u64 = 1_000_000;
const FUNDS: u64 = 50_000_000;
const REQUEST: RequestId = [7u8; 32];

struct Market {
    exchange: Exchange<InMemoryTokenLedger, ManualClock>,
    clock: ManualClock,
    authority: Pubkey,
    publisher: Pubkey,
    dsp1: Pubkey,
    dsp2: Pubkey,
}

impl Market {
    fn new() -> Self {
        let clock = ManualClock::new(1_750_000_000);
        let mut exchange = Exchange::new(
            ProgramDerived::new(Pubkey::new_unique()),
            InMemoryTokenLedger::new(),
            clock.clone(),
        );
        let authority = Pubkey::new_unique();
        let (publisher, dsp1, dsp2) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());

        exchange
            .initialize(authority, Pubkey::new_unique(), 20, 80)
            .unwrap();
        exchange
            .register_publisher(publisher, "Daily News", "news.example", None)
            .unwrap();
        exchange.register_dsp(dsp1, "DSP One", "one.example").unwrap();
        exchange.register_dsp(dsp2, "DSP Two", "two.example").unwrap();
        exchange.tokens_mut().credit(dsp1, FUNDS);
        exchange.tokens_mut().credit(dsp2, FUNDS);
        exchange.connect_accelerated();

        Self {
            exchange,
            clock,
            authority,
            publisher,
            dsp1,
            dsp2,
        }
    }

    fn vault_tokens(&self) -> u64 {
        let vault = pda::vault_address(self.exchange.deriver());
        self.exchange.tokens().balance(&vault)
    }

    fn assert_vault_backed(&self) {
        let vault = self.exchange.vault().unwrap();
        assert_eq!(self.vault_tokens(), vault.total_balance + vault.fee_balance);
    }

    /// Ask, two bids, delegate everything. Returns the response addresses
    fn open_and_bid(&mut self, bid1: u64, bid2: u64) -> (Pubkey, Pubkey) {
        let (publisher, dsp1, dsp2) = (self.publisher, self.dsp1, self.dsp2);
        self.exchange.place_ad_ask(&publisher, REQUEST, FLOOR).unwrap();
        self.exchange
            .delegate_ad_request(&publisher, &publisher, &REQUEST)
            .unwrap();

        let r1 = self
            .exchange
            .place_ad_bid(&dsp1, &publisher, REQUEST, bid1, [1u8; 32])
            .unwrap();
        self.exchange
            .delegate_ad_response(&dsp1, &dsp1, &[1u8; 32])
            .unwrap();
        let r2 = self
            .exchange
            .place_ad_bid(&dsp2, &publisher, REQUEST, bid2, [2u8; 32])
            .unwrap();
        self.exchange
            .delegate_ad_response(&dsp2, &dsp2, &[2u8; 32])
            .unwrap();
        (r1, r2)
    }

    fn undelegate_all(&mut self) {
        let (authority, publisher, dsp1, dsp2) = (self.authority, self.publisher, self.dsp1, self.dsp2);
        self.exchange
            .undelegate_request_after_auction(&publisher, &publisher, &REQUEST)
            .unwrap();
        self.exchange
            .undelegate_response_after_auction(&dsp1, &dsp1, &[1u8; 32])
            .unwrap();
        self.exchange
            .undelegate_response_after_auction(&authority, &dsp2, &[2u8; 32])
            .unwrap();
        self.exchange
            .undelegate_auction_record_after_auction(&authority, &publisher, &REQUEST)
            .unwrap();
    }
}

#[test]
fn test_reference_auction_end_to_end() {
    let mut m = Market::new();
    let (r1, r2) = m.open_and_bid(3_000_000, 2_000_000);
    assert_eq!(
        m.exchange.request_status(&m.publisher, &REQUEST),
        Ok(RequestStatus::Delegated)
    );
    m.assert_vault_backed();

    let publisher = m.publisher;
    let record = m
        .exchange
        .process_auction(&publisher, &publisher, REQUEST, &[r1, r2])
        .unwrap();
    assert_eq!(record.winning_dsp, m.dsp1);
    assert_eq!(record.clearing_price, 3_000_000);
    assert_eq!(record.platform_fee, 600_000);
    assert_eq!(record.publisher_payment, 2_400_000);
    assert_eq!(record.platform_fee + record.publisher_payment, record.clearing_price);

    // The record is not visible on the base layer until its commit lands
    let record_address = pda::auction_record_address(m.exchange.deriver(), &publisher, &REQUEST);
    assert_eq!(
        m.exchange.fetch::<AuctionRecord>(Layer::Base, &record_address),
        Err(AdxError::AccountNotFound)
    );
    assert_eq!(
        m.exchange.settle_auction(&publisher, REQUEST),
        Err(AdxError::CommitPending)
    );

    m.undelegate_all();
    assert_eq!(m.exchange.pending_commits().len(), 4);
    assert_eq!(m.exchange.flush_commits(), Ok(4));
    assert_eq!(
        m.exchange.residency(&record_address),
        Residency::Resident(Layer::Base)
    );

    m.exchange.process_auction_results(&publisher, REQUEST).unwrap();
    m.assert_vault_backed();
    m.exchange.settle_auction(&publisher, REQUEST).unwrap();
    m.assert_vault_backed();

    // DSP1 paid its bid, DSP2 is whole again
    assert_eq!(m.exchange.tokens().balance(&m.dsp1), FUNDS - 3_000_000);
    assert_eq!(m.exchange.tokens().balance(&m.dsp2), FUNDS);
    assert_eq!(m.exchange.dsp(&m.dsp1).unwrap().balance, 0);
    assert_eq!(m.exchange.dsp(&m.dsp2).unwrap().balance, 0);
    assert_eq!(m.exchange.tokens().balance(&publisher), 2_400_000);
    assert_eq!(m.exchange.vault().unwrap().fee_balance, 600_000);

    let settled = m
        .exchange
        .fetch::<AuctionRecord>(Layer::Base, &record_address)
        .unwrap();
    assert!(settled.is_settled);

    let events = m.exchange.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ExchangeEvent::AuctionSettled { platform_fee: 600_000, .. })));
}

#[test]
fn test_both_bids_below_floor() {
    let mut m = Market::new();
    let (r1, r2) = m.open_and_bid(500_000, 999_999);
    let publisher = m.publisher;

    assert_eq!(
        m.exchange.process_auction(&publisher, &publisher, REQUEST, &[r1, r2]),
        Err(AdxError::NoEligibleBids)
    );
    let request_address = pda::ad_request_address(m.exchange.deriver(), &publisher, &REQUEST);
    let request = m
        .exchange
        .fetch::<AdRequest>(Layer::Accelerated, &request_address)
        .unwrap();
    assert_eq!(request.status, RequestStatus::Open);
    let record_address = pda::auction_record_address(m.exchange.deriver(), &publisher, &REQUEST);
    assert!(m
        .exchange
        .fetch::<AuctionRecord>(Layer::Accelerated, &record_address)
        .is_err());

    // Below-floor responses persist
    assert!(m.exchange.fetch::<AdResponse>(Layer::Base, &r1).is_ok());
}

#[test]
fn test_duplicate_registration_keeps_first() {
    let mut m = Market::new();
    let publisher = m.publisher;
    assert!(m.exchange.publisher_exists(&publisher));
    assert_eq!(
        m.exchange
            .register_publisher(publisher, "Impostor", "evil.example", Some(Pubkey::new_unique())),
        Err(AdxError::AlreadyRegistered)
    );
    let record = m.exchange.publisher(&publisher).unwrap();
    assert_eq!(record.name, "Daily News");
    assert_eq!(record.payment_address, publisher);
}

#[test]
fn test_reinitialize_fails() {
    let mut m = Market::new();
    assert_eq!(
        m.exchange.initialize(m.authority, Pubkey::new_unique(), 20, 80),
        Err(AdxError::AlreadyInitialized)
    );
}

#[test]
fn test_stale_commit_rejected_after_acceptance() {
    let mut m = Market::new();
    let (r1, r2) = m.open_and_bid(3_000_000, 2_000_000);
    let publisher = m.publisher;
    m.exchange
        .process_auction(&publisher, &publisher, REQUEST, &[r1, r2])
        .unwrap();
    m.undelegate_all();

    let ids = m.exchange.pending_commits();
    let artifact = m.exchange.lookup_commit(ids[0]).cloned().unwrap();
    m.exchange.accept_commit(&artifact).unwrap();
    assert_eq!(m.exchange.accept_commit(&artifact), Err(AdxError::StaleCommit));
    assert!(m.exchange.lookup_commit(ids[0]).is_none());
}

#[test]
fn test_base_mutation_of_delegated_entity_fails_fast() {
    let mut m = Market::new();
    let (r1, _r2) = m.open_and_bid(3_000_000, 2_000_000);
    let dsp1 = m.dsp1;
    m.clock.advance(REQUEST_TTL_SECONDS + 1);

    // The response is delegated, so the base copy cannot be closed
    assert_eq!(m.exchange.reclaim_bid(&dsp1, [1u8; 32]), Err(AdxError::EntityDelegated));
    m.exchange
        .undelegate_response_after_auction(&dsp1, &dsp1, &[1u8; 32])
        .unwrap();
    assert_eq!(m.exchange.reclaim_bid(&dsp1, [1u8; 32]), Err(AdxError::CommitPending));
    assert_eq!(
        m.exchange.residency(&r1),
        Residency::InFlight {
            commit_id: m.exchange.pending_commits()[0]
        }
    );
}

#[test]
fn test_reclaim_after_expiry_returns_escrow() {
    let mut m = Market::new();
    let (publisher, dsp1, dsp2) = (m.publisher, m.dsp1, m.dsp2);
    m.exchange.place_ad_ask(&publisher, REQUEST, FLOOR).unwrap();
    m.exchange
        .place_ad_bid(&dsp1, &publisher, REQUEST, 2_000_000, [1u8; 32])
        .unwrap();
    assert_eq!(m.exchange.reclaim_bid(&dsp1, [1u8; 32]), Err(AdxError::BidLocked));

    m.clock.advance(REQUEST_TTL_SECONDS + 1);
    assert_eq!(
        m.exchange
            .place_ad_bid(&dsp2, &publisher, REQUEST, 2_000_000, [2u8; 32]),
        Err(AdxError::Expired)
    );
    assert_eq!(m.exchange.reclaim_bid(&dsp1, [1u8; 32]), Ok(2_000_000));
    assert_eq!(m.exchange.tokens().balance(&dsp1), FUNDS);
    m.assert_vault_backed();
}

#[test]
fn test_failed_operation_changes_nothing() {
    let mut m = Market::new();
    let (publisher, dsp1) = (m.publisher, m.dsp1);
    m.exchange.place_ad_ask(&publisher, REQUEST, FLOOR).unwrap();
    let vault_before = m.exchange.vault().unwrap().clone();
    let dsp_before = m.exchange.dsp(&dsp1).unwrap().clone();

    assert_eq!(
        m.exchange
            .place_ad_bid(&dsp1, &publisher, REQUEST, FUNDS + 1, [1u8; 32]),
        Err(AdxError::InsufficientFunds)
    );
    assert_eq!(m.exchange.vault().unwrap(), &vault_before);
    assert_eq!(m.exchange.dsp(&dsp1).unwrap(), &dsp_before);
    assert_eq!(m.exchange.tokens().balance(&dsp1), FUNDS);
}

#[test]
fn test_reconcile_refunds_below_floor_loser() {
    let mut m = Market::new();
    let dsp3 = Pubkey::new_unique();
    m.exchange.register_dsp(dsp3, "DSP Three", "three.example").unwrap();
    m.exchange.tokens_mut().credit(dsp3, FUNDS);
    let (authority, publisher, dsp1, dsp2) = (m.authority, m.publisher, m.dsp1, m.dsp2);

    m.exchange.place_ad_ask(&publisher, REQUEST, FLOOR).unwrap();
    m.exchange
        .delegate_ad_request(&publisher, &publisher, &REQUEST)
        .unwrap();
    let bids = [(dsp1, 3_000_000, [1u8; 32]), (dsp2, 400_000, [2u8; 32]), (dsp3, 2_000_000, [3u8; 32])];
    let mut responses = Vec::new();
    for (dsp, amount, creative_id) in bids {
        responses.push(
            m.exchange
                .place_ad_bid(&dsp, &publisher, REQUEST, amount, creative_id)
                .unwrap(),
        );
        m.exchange.delegate_ad_response(&dsp, &dsp, &creative_id).unwrap();
    }
    assert_eq!(m.exchange.tokens().balance(&dsp2), FUNDS - 400_000);

    let record = m
        .exchange
        .process_auction(&publisher, &publisher, REQUEST, &responses)
        .unwrap();
    assert_eq!(record.winning_dsp, dsp1);
    assert_eq!(record.losing_responses, vec![responses[1], responses[2]]);

    m.exchange
        .undelegate_request_after_auction(&authority, &publisher, &REQUEST)
        .unwrap();
    for (dsp, _, creative_id) in bids {
        m.exchange
            .undelegate_response_after_auction(&authority, &dsp, &creative_id)
            .unwrap();
    }
    m.exchange
        .undelegate_auction_record_after_auction(&authority, &publisher, &REQUEST)
        .unwrap();
    assert_eq!(m.exchange.flush_commits(), Ok(5));

    let reconciliation = m.exchange.process_auction_results(&publisher, REQUEST).unwrap();
    assert_eq!(reconciliation.refunded_responses, 2);
    assert_eq!(reconciliation.refunded_amount, 2_400_000);
    for loser in [dsp2, dsp3] {
        assert_eq!(m.exchange.tokens().balance(&loser), FUNDS);
        assert_eq!(m.exchange.dsp(&loser).unwrap().balance, 0);
    }
    assert_eq!(m.exchange.dsp(&dsp1).unwrap().balance, 3_000_000);
    m.assert_vault_backed();
}
