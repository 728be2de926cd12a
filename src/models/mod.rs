// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{Event, EventStatus, EventStats, Gender, Match, MatchInsert, Message, MessageView, NewParticipant, NormalizedPair, Participant, ParticipantStats, Signal};
pub use requests::{CreateEventRequest, EventCodeQuery, JoinRequest, MessageRequest, SignalRequest, StreamQuery};
pub use responses::{Card, CardsResponse, CountResponse, EventStateResponse, HealthResponse, JoinResponse, MatchesResponse, MeResponse, MessagesResponse, PartnerView, SignalResponse, SnapshotResponse};
