//! CLPR queue and application ABI definitions
//!
//! Uses alloy's sol! macro to generate call/event types. Encoding and decoding
//! happen locally; the gateway only moves raw calldata.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Relayed queue deployed on each ledger. The source side buffers outbound
    /// requests and accepts responses; the destination side accepts requests
    /// and buffers the responses its applications produce.
    contract ClprRelayedQueue {
        /// Last message id assigned by this queue (0 before the first send)
        function nextMessageId() external view returns (uint256);

        /// Encoded outbound request; reverts with MessageNotFound until the send is finalized
        function getOutboundMessageBytes(uint256 messageId) external view returns (bytes);

        /// Hand request bytes produced on the other ledger to this queue
        function deliverInboundMessage(uint256 messageId, bytes messageBytes) external;

        /// Encoded response for an inbound message; reverts with ResponseNotFound until produced
        function getPendingResponseBytes(uint256 messageId) external view returns (bytes);

        /// Hand response bytes produced on the other ledger back to this queue
        function deliverInboundResponse(bytes responseBytes) external;

        /// Whether the response for an outbound message has been delivered
        function inboundResponseDelivered(uint256 messageId) external view returns (bool);

        event MessageEnqueued(
            uint256 indexed messageId,
            address indexed senderApplicationId,
            address destinationApplicationId,
            address sourceConnectorId,
            address destinationConnectorId
        );

        /// Outbound request not (yet) stored under this id
        error MessageNotFound(uint256 messageId);
        /// No response produced (yet) for this inbound message
        error ResponseNotFound(uint256 messageId);
    }

    /// Source-ledger application that originates requests
    contract SourceApplication {
        function send(bytes payload) external;
    }

    /// Destination-ledger application that echoes requests and counts them
    contract EchoApplication {
        function requestCount() external view returns (uint256);
    }
}
