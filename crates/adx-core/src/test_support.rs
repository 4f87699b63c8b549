//! Shared fixtures for unit tests.

use solana_program::pubkey::Pubkey;

use crate::clock::ManualClock;
use crate::constants::{CreativeId, RequestId};
use crate::delegation::Residency;
use crate::errors::AdxResult;
use crate::exchange::Exchange;
use crate::pda::{self, ProgramDerived};
use crate::state::{AdResponse, AuctionRecord};
use crate::store::Layer;
use crate::token::{InMemoryTokenLedger, TokenLedger};

pub(crate) const START_TIME: i64 = 1_700_000_000;
pub(crate) const REQUEST_ID: RequestId = [42u8; 32];
pub(crate) const DSP_FUNDS: u64 = 10_000_000;

pub(crate) type TestExchange = Exchange<InMemoryTokenLedger, ManualClock>;

pub(crate) fn new_exchange() -> TestExchange {
    Exchange::new(
        ProgramDerived::new(Pubkey::new_unique()),
        InMemoryTokenLedger::new(),
        ManualClock::new(START_TIME),
    )
}

/// Initialized with a 20/80 split
pub(crate) fn initialized_exchange(authority: Pubkey) -> TestExchange {
    let mut exchange = new_exchange();
    exchange
        .initialize(authority, Pubkey::new_unique(), 20, 80)
        .unwrap();
    exchange
}

/// One publisher, two funded DSPs, accelerated session attached
pub(crate) struct Harness {
    pub exchange: TestExchange,
    pub clock: ManualClock,
    pub authority: Pubkey,
    pub publisher: Pubkey,
    pub dsp_a: Pubkey,
    pub dsp_b: Pubkey,
}

impl Harness {
    pub fn new() -> Self {
        let authority = Pubkey::new_unique();
        let mut exchange = initialized_exchange(authority);
        let clock = exchange.clock().clone();
        let publisher = Pubkey::new_unique();
        let dsp_a = Pubkey::new_unique();
        let dsp_b = Pubkey::new_unique();

        exchange
            .register_publisher(publisher, "news", "news.example", None)
            .unwrap();
        exchange.register_dsp(dsp_a, "dsp-a", "a.example").unwrap();
        exchange.register_dsp(dsp_b, "dsp-b", "b.example").unwrap();
        exchange.tokens_mut().credit(dsp_a, DSP_FUNDS);
        exchange.tokens_mut().credit(dsp_b, DSP_FUNDS);
        exchange.connect_accelerated();

        Self {
            exchange,
            clock,
            authority,
            publisher,
            dsp_a,
            dsp_b,
        }
    }

    pub fn request_address(&self) -> Pubkey {
        pda::ad_request_address(self.exchange.deriver(), &self.publisher, &REQUEST_ID)
    }

    pub fn record_address(&self) -> Pubkey {
        pda::auction_record_address(self.exchange.deriver(), &self.publisher, &REQUEST_ID)
    }

    pub fn vault_tokens(&self) -> u64 {
        let vault = pda::vault_address(self.exchange.deriver());
        self.exchange.tokens().balance(&vault)
    }

    pub fn open_request(&mut self, floor_price: u64) -> Pubkey {
        self.open_request_with_id(REQUEST_ID, floor_price)
    }

    pub fn open_request_with_id(&mut self, request_id: RequestId, floor_price: u64) -> Pubkey {
        let publisher = self.publisher;
        self.exchange
            .place_ad_ask(&publisher, request_id, floor_price)
            .unwrap()
    }

    pub fn bid(&mut self, dsp: Pubkey, amount: u64, creative_id: CreativeId) -> AdxResult<Pubkey> {
        let publisher = self.publisher;
        self.exchange
            .place_ad_bid(&dsp, &publisher, REQUEST_ID, amount, creative_id)
    }

    /// Delegate the request (if still on base) and each response
    pub fn delegate_all(&mut self, responses: &[Pubkey]) {
        let publisher = self.publisher;
        let request = self.request_address();
        if self.exchange.residency(&request) == Residency::Resident(Layer::Base) {
            self.exchange.delegate(&publisher, &request).unwrap();
        }
        for address in responses {
            let dsp = self
                .exchange
                .fetch::<AdResponse>(Layer::Base, address)
                .unwrap()
                .dsp;
            self.exchange.delegate(&dsp, address).unwrap();
        }
    }

    pub fn clear(&mut self, responses: &[Pubkey]) -> AdxResult<AuctionRecord> {
        let publisher = self.publisher;
        self.exchange
            .process_auction(&publisher, &publisher, REQUEST_ID, responses)
    }

    /// Undelegate request, responses and record, then land every commit
    pub fn commit_back(&mut self, responses: &[Pubkey]) {
        let authority = self.authority;
        let request = self.request_address();
        let record = self.record_address();
        self.exchange.undelegate(&authority, &request).unwrap();
        for address in responses {
            self.exchange.undelegate(&authority, address).unwrap();
        }
        self.exchange.undelegate(&authority, &record).unwrap();
        self.exchange.flush_commits().unwrap();
    }

    /// Ask, bid, delegate, clear and commit back in one go
    pub fn run_to_commit(&mut self, floor_price: u64, bids: &[(Pubkey, u64)]) -> AuctionRecord {
        self.open_request(floor_price);
        let mut responses = Vec::new();
        for (i, (dsp, amount)) in bids.iter().enumerate() {
            responses.push(self.bid(*dsp, *amount, [i as u8 + 1; 32]).unwrap());
        }
        self.delegate_all(&responses);
        let record = self.clear(&responses).unwrap();
        self.commit_back(&responses);
        record
    }
}
