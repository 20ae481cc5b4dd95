//! ERC20 and WETH bindings

use alloy::sol;

sol! {
    /// Standard ERC20 interface
    interface IERC20 {
        function name() external view returns (string memory);
        function symbol() external view returns (string memory);
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function transfer(address to, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }

    /// Wrapped ether
    interface IWETH {
        /// Wraps the attached ether
        function deposit() external payable;

        /// Unwraps `wad` back to ether
        function withdraw(uint256 wad) external;
    }
}
