//! Solidity bindings for the parts of a Spool deployment the harness touches.
//!
//! Uses alloy's `sol!` macro to generate type-safe ABI encoders/decoders.
//! Only the call surface is described here; the contracts themselves live
//! with the protocol.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface ISpoolController {
        function getAllStrategies() external view returns (address[] memory);
        function createAllocationRequest(
            address vault, uint256 strategiesBitwise, uint256 proportionsBitwise
        ) external returns (uint256 requestId);
        function doHardWork() external;
    }

    #[sol(rpc)]
    interface ISpoolVault {
        function underlying() external view returns (address);
        function getStrategies() external view returns (address[] memory);
        function proportions() external view returns (uint256);
        function deposit(uint256 amount) external;
        function withdraw(uint256 shares) external;
        function claim() external returns (uint256 amount);
    }

    #[sol(rpc)]
    interface ISpoolLens {
        function settleVault(address vault) external returns (
            uint256 totalUnderlying,
            uint256 totalShares,
            uint256 pendingDeposit,
            uint256 pendingWithdrawShares,
            uint256 pendingDepositNext,
            uint256 pendingWithdrawSharesNext
        );
        function getStrategyTotals(address strategy) external view returns (
            uint256 totalUnderlying, uint256 totalShares
        );
        function getVaultStrategyPosition(address vault, address strategy) external view returns (
            uint256 balance, uint256 shares
        );
        function getUserVaultState(address user, address vault) external view returns (
            uint256 shares,
            uint256 activeDeposit,
            uint256 owed,
            uint256 withdrawnDeposits,
            uint256 totalUnderlying,
            uint256 pendingDeposit,
            uint256 pendingWithdrawShares,
            uint256 pendingDepositNext,
            uint256 pendingWithdrawSharesNext
        );
    }

    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}
